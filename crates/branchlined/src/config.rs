//! Daemon configuration from flags and environment.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use branchline_core::StageBranches;
use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(name = "branchlined", version, about = "Branchline HTTP service")]
pub struct Config {
    /// Address to bind
    #[arg(long, env = "BRANCHLINE_BIND", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub bind: IpAddr,

    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// Directory uploaded files are staged in
    #[arg(long, env = "BRANCHLINE_UPLOAD_DIR", default_value = "Files")]
    pub upload_dir: PathBuf,

    /// JSON audit log path
    #[arg(long, env = "BRANCHLINE_AUDIT_LOG", default_value = "audit.json")]
    pub audit_log: PathBuf,

    /// Largest accepted upload, in megabytes
    #[arg(long, env = "BRANCHLINE_MAX_UPLOAD_MB", default_value_t = 25)]
    pub max_upload_mb: usize,

    #[arg(long, env = "BRANCHLINE_DEV_BRANCH", default_value = "dev")]
    pub dev_branch: String,

    #[arg(long, env = "BRANCHLINE_UAT_BRANCH", default_value = "uat")]
    pub uat_branch: String,

    #[arg(long, env = "BRANCHLINE_MAIN_BRANCH", default_value = "main")]
    pub main_branch: String,

    /// Emit JSON log lines
    #[arg(long, env = "BRANCHLINE_LOG_JSON")]
    pub json: bool,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Config {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    pub fn stage_branches(&self) -> StageBranches {
        StageBranches {
            dev: self.dev_branch.clone(),
            uat: self.uat_branch.clone(),
            main: self.main_branch.clone(),
        }
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_config_is_well_formed() {
        Config::command().debug_assert();
    }

    #[test]
    fn test_defaults() {
        let config = Config::try_parse_from(["branchlined"]).unwrap();
        assert_eq!(config.socket_addr().port(), config.port);
        assert_eq!(config.max_upload_bytes(), config.max_upload_mb * 1024 * 1024);
    }

    #[test]
    fn test_stage_branch_overrides() {
        let config = Config::try_parse_from([
            "branchlined",
            "--uat-branch",
            "UAT",
            "--port",
            "8080",
            "--bind",
            "127.0.0.1",
        ])
        .unwrap();
        let branches = config.stage_branches();
        assert_eq!(branches.uat, "UAT");
        assert_eq!(branches.branch(branchline_core::Stage::Uat), "UAT");
        assert_eq!(config.socket_addr().to_string(), "127.0.0.1:8080");
    }
}
