//! Pair job construction.
//!
//! One request becomes one scheduler job with two task groups: the `hmi`
//! half the user talks to and the `core` half behind it. Each half
//! registers its services with the discovery substrate; `hmi` and `core`
//! carry health checks and gate pairing success, `broker` and `tcp` are
//! check-less port services that exist to be resolvable.

use crate::config::Config;
use crate::keys;
use crate::request::Request;
use crate::scheduler::{
    CheckSpec, Job, Resources, RestartPolicy, ServiceSpec, Task, TaskConfig, TaskGroup,
};

/// A service the job declares, and whether it carries a health check. The
/// saga health-gates only the checked ones but resolves addresses for all
/// of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredService {
    pub name: String,
    pub checked: bool,
}

fn restart_policy() -> RestartPolicy {
    RestartPolicy { attempts: 2, interval_secs: 300, delay_secs: 15, mode: "fail".into() }
}

fn resources(ports: &[&str]) -> Resources {
    Resources {
        cpu_mhz: 500,
        memory_mb: 512,
        dynamic_ports: ports.iter().map(|p| p.to_string()).collect(),
    }
}

/// Build the two-task pair job for `request`, along with the services it
/// declares.
pub fn pair_job(request: &Request, config: &Config) -> (Job, Vec<DeclaredService>) {
    let prefix = &config.service_prefix;
    let id = &request.id;

    let hmi_service = keys::hmi_service_name(prefix, id);
    let core_service = keys::core_service_name(prefix, id);
    let broker_service = keys::broker_service_name(prefix, id);
    let tcp_service = keys::tcp_service_name(prefix, id);

    let hmi_task = Task {
        name: "hmi".into(),
        driver: "docker".into(),
        config: TaskConfig { image: config.hmi_image.clone() },
        services: vec![
            ServiceSpec {
                name: hmi_service.clone(),
                port_label: "hmi".into(),
                checks: vec![CheckSpec {
                    check_type: "http".into(),
                    path: Some("/health".into()),
                    interval_secs: 10,
                    timeout_secs: 2,
                }],
            },
            ServiceSpec { name: broker_service.clone(), port_label: "broker".into(), checks: vec![] },
        ],
        resources: resources(&["hmi", "broker"]),
    };

    let core_task = Task {
        name: "core".into(),
        driver: "docker".into(),
        config: TaskConfig { image: config.core_image.clone() },
        services: vec![
            ServiceSpec {
                name: core_service.clone(),
                port_label: "core".into(),
                checks: vec![CheckSpec {
                    check_type: "tcp".into(),
                    path: None,
                    interval_secs: 10,
                    timeout_secs: 2,
                }],
            },
            ServiceSpec { name: tcp_service.clone(), port_label: "tcp".into(), checks: vec![] },
        ],
        resources: resources(&["core", "tcp"]),
    };

    let name = keys::job_name(prefix, id);
    let job = Job {
        id: name.clone(),
        name,
        job_type: "service".into(),
        task_groups: vec![
            TaskGroup {
                name: "hmi".into(),
                count: 1,
                tasks: vec![hmi_task],
                restart_policy: restart_policy(),
            },
            TaskGroup {
                name: "core".into(),
                count: 1,
                tasks: vec![core_task],
                restart_policy: restart_policy(),
            },
        ],
    };

    let declared = vec![
        DeclaredService { name: hmi_service, checked: true },
        DeclaredService { name: core_service, checked: true },
        DeclaredService { name: broker_service, checked: false },
        DeclaredService { name: tcp_service, checked: false },
    ];

    (job, declared)
}
