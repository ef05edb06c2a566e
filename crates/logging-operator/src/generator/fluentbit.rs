//! fluent-bit configuration for topologies that collect with fluent-bit and
//! normalize with fluentd.
//!
//! The fluent-bit side never depends on the forwarder spec: it tails container
//! logs and forwards everything to a fluentd endpoint.

use std::collections::BTreeMap;

use crate::constants::{keys, paths, ports};

pub const PARSERS: &str = include_str!("assets/parsers.conf");
pub const CONCAT_CRIO: &str = include_str!("assets/concat-crio.lua");

/// Render `fluent-bit.conf` forwarding to `host:port`.
pub fn config(host: &str, port: i32) -> String {
    let config_dir = paths::FLUENTBIT_CONFIG_DIR;
    let metrics_port = ports::COLLECTOR_METRICS;
    format!(
        "\
[SERVICE]
    Flush         1
    Log_Level     ${{LOG_LEVEL}}
    Daemon        Off
    Parsers_File  {config_dir}/{parsers}
    HTTP_Server   On
    HTTP_Listen   0.0.0.0
    HTTP_Port     {metrics_port}

[INPUT]
    Name              tail
    Tag               kubernetes.*
    Path              /var/log/containers/*.log
    Parser            cri-o
    DB                {buffer}/fluentbit-containers.db
    Mem_Buf_Limit     5MB
    Skip_Long_Lines   On
    Refresh_Interval  5

[FILTER]
    Name    lua
    Match   kubernetes.*
    script  {config_dir}/{concat}
    call    concat

[OUTPUT]
    Name          forward
    Match         *
    Host          {host}
    Port          {port}
    Retry_Limit   False
",
        parsers = keys::FLUENTBIT_PARSERS,
        concat = keys::FLUENTBIT_CONCAT,
        buffer = paths::BUFFER_DIR,
    )
}

/// Contents of the fluent-bit ConfigMap.
pub fn collector_files(host: &str, port: i32) -> BTreeMap<String, String> {
    BTreeMap::from([
        (keys::FLUENTBIT_CONF.to_string(), config(host, port)),
        (keys::FLUENTBIT_PARSERS.to_string(), PARSERS.to_string()),
        (keys::FLUENTBIT_CONCAT.to_string(), CONCAT_CRIO.to_string()),
    ])
}
