pub mod network {
    pub const SSH_DEFAULT_PORT: u16 = 22;
    pub const SSH_DEFAULT_USER: &str = "centos";
    pub const TIMEOUT_SSH_CONNECT_SECS: u64 = 30;
    pub const SSH_CONNECTION_ATTEMPTS: u32 = 10;
    pub const SSH_CONNECTION_ATTEMPT_DELAY_MS: u64 = 1_000;
    pub const KEEPALIVE_INTERVAL_SECS: u32 = 30;
    pub const OFFLINE_CHECK_HOST: &str = "www.google.com";
}

pub mod readiness {
    pub const PROBE_COMMAND: &str = "echo";
    pub const MAX_RETRIES: u32 = 10;
    pub const INTERVAL_SECS: u64 = 30;
}

pub mod retry {
    pub const COMMAND_RETRY_INTERVAL_SECS: u64 = 30;
    pub const CUSTOM_MACHINE_RETRIES: u32 = 3;
    pub const PREREQUISITE_RETRIES: u32 = 5;
    pub const DOWNLOAD_RETRIES: u32 = 2;
    pub const SERVER_CONFIRM_RETRIES: u32 = 3;
    pub const SERVER_CONFIRM_INTERVAL_SECS: u64 = 2;
}

pub mod file_server {
    pub const PORT: u16 = 8080;
    pub const DEPLOYMENT_NAME: &str = "File-Server";
    pub const STAGING_DIR: &str = "File-Server";
    pub const BLUEPRINT: &str = "resources/test-start-fileserver-vm-blueprint.yaml";
    pub const ADDRESS_OUTPUT: &str = "vm_public_ip_address";
    pub const PREREQUISITE_COMMAND: &str = "yum install -y screen";
    pub const TASK_RETRIES: u32 = 40;
    pub const TASK_RETRY_INTERVAL_SECS: u64 = 30;
}

pub mod blueprint {
    pub const RESOURCE_SECTIONS: &[&str] =
        &["agent_package_urls", "plugin_resources", "dsl_resources"];
}

pub mod limits {
    pub const MAX_LOGGED_OUTPUT_BYTES: usize = 16 * 1024;
}
