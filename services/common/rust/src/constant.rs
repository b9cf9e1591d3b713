pub mod env_vars {
    pub const SYS_BASEPATH: &str = "SYS_BASE_PATH";
    pub const SERVICE_BASEPATH: &str = "SERVICE_BASE_PATH";
    // relative path starting from app / service home folder
    pub const CFG_FILEPATH: &str = "CONFIG_FILE_PATH";
    pub const EXPECTED_LABELS: [&str; 3] = [SYS_BASEPATH, SERVICE_BASEPATH, CFG_FILEPATH];
}

pub mod limit {
    // default values applied when the corresponding config field is omitted
    pub const REQ_BODY_BYTES: usize = 1024 * 1024;
    pub const WEBHOOK_WINDOW_SECS: u32 = 60;
    pub const WEBHOOK_MAX_REQUESTS: u32 = 100;
    pub const WEBHOOK_SIGNATURE_TOLERANCE_SECS: u32 = 300;
    pub const ALLOCATION_MAX_GENERATED_MONTHS: u16 = 600;
}

pub mod logging {
    use serde::Deserialize;

    #[allow(clippy::upper_case_acronyms)]
    #[derive(Deserialize, Debug, Clone)]
    pub enum Level {
        TRACE,
        DEBUG,
        INFO,
        WARNING,
        ERROR,
        FATAL,
    }

    #[allow(clippy::upper_case_acronyms)]
    #[derive(Deserialize, Debug, Clone)]
    #[serde(rename_all = "lowercase")]
    pub enum Destination {
        CONSOLE,
        LOCALFS,
    }
}
