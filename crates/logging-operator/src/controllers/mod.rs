pub mod cluster_logging_controller;
