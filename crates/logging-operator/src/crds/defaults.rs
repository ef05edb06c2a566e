//! Default functions for serde defaults in CRD specs.

use super::cluster_logging::ManagementState;

pub fn management_state() -> ManagementState {
    ManagementState::Managed
}

pub fn node_count() -> i32 {
    1
}

pub fn kibana_replicas() -> i32 {
    1
}

pub fn curator_schedule() -> String {
    "30 3 * * *".to_string()
}

pub fn syslog_rfc() -> String {
    "RFC5424".to_string()
}

pub fn syslog_facility() -> String {
    "user".to_string()
}

pub fn syslog_severity() -> String {
    "informational".to_string()
}
