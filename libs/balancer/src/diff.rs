use std::cmp::Ordering;

use crate::Listener;

/// The minimal edit turning an actual listener set into an expected one.
/// Removals are external ports; additions are full listeners.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListenerChanges {
    pub to_remove: Vec<u16>,
    pub to_add: Vec<Listener>,
}

impl ListenerChanges {
    pub fn is_empty(&self) -> bool {
        self.to_remove.is_empty() && self.to_add.is_empty()
    }
}

/// Diff `expected` against `actual` by walking both sets in external-port
/// order.
///
/// A port present on both sides with identical bindings produces no change.
/// The same port with a different binding produces a remove *and* an add,
/// since the balancer cannot rebind a live port in place. Ports on only one
/// side become plain adds or removes.
pub fn diff_listeners(expected: &[Listener], actual: &[Listener]) -> ListenerChanges {
    let mut expected: Vec<&Listener> = expected.iter().collect();
    let mut actual: Vec<&Listener> = actual.iter().collect();
    expected.sort_by_key(|l| l.balancer_port);
    actual.sort_by_key(|l| l.balancer_port);

    let mut changes = ListenerChanges::default();
    let (mut i, mut j) = (0, 0);
    while i < expected.len() && j < actual.len() {
        let (e, a) = (expected[i], actual[j]);
        match e.balancer_port.cmp(&a.balancer_port) {
            Ordering::Equal => {
                if e != a {
                    changes.to_remove.push(a.balancer_port);
                    changes.to_add.push(e.clone());
                }
                i += 1;
                j += 1;
            }
            Ordering::Less => {
                changes.to_add.push(e.clone());
                i += 1;
            }
            Ordering::Greater => {
                changes.to_remove.push(a.balancer_port);
                j += 1;
            }
        }
    }
    changes.to_add.extend(expected[i..].iter().map(|l| (*l).clone()));
    changes.to_remove.extend(actual[j..].iter().map(|l| l.balancer_port));
    changes
}
