use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(name = "gradebookd")]
#[command(about = "Gradebook service speaking line-delimited JSON on stdin/stdout")]
pub struct Args {
    /// Workspace directory to open at startup
    #[arg(long, env = "GRADEBOOK_WORKSPACE")]
    pub workspace: Option<PathBuf>,

    /// Login accepted by auth.login
    #[arg(long, env = "GRADEBOOK_USERNAME", default_value = "teacher")]
    pub username: String,

    #[arg(long, env = "GRADEBOOK_PASSWORD", default_value = "gradebook", hide_env_values = true)]
    pub password: String,

    /// tracing filter directive, e.g. "gradebookd=debug"
    #[arg(long = "log", env = "GRADEBOOK_LOG")]
    pub log_filter: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn matches(&self, username: &str, password: &str) -> bool {
        self.username == username && self.password == password
    }
}

impl Args {
    pub fn credentials(&self) -> Credentials {
        Credentials {
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_flags() {
        let args = Args::try_parse_from(["gradebookd"]).expect("parse");
        assert_eq!(args.username, "teacher");
        assert!(args.credentials().matches("teacher", "gradebook"));
        assert!(!args.credentials().matches("teacher", "wrong"));
    }

    #[test]
    fn flags_override_defaults() {
        let args = Args::try_parse_from([
            "gradebookd",
            "--workspace",
            "/tmp/ws",
            "--username",
            "admin",
            "--log",
            "gradebookd=debug",
        ])
        .expect("parse");
        assert_eq!(args.workspace, Some(PathBuf::from("/tmp/ws")));
        assert_eq!(args.username, "admin");
        assert_eq!(args.log_filter.as_deref(), Some("gradebookd=debug"));
    }
}
