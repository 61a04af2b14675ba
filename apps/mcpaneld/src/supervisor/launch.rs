use std::path::PathBuf;
use std::process::Stdio;

use mcpanel_utils::InstancePaths;
use tokio::process::Command;

/// Program, arguments and working directory used to spawn the server.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

impl LaunchSpec {
    /// `<java> -Xmx<max> -Xms<min> -jar <instance>/server.jar nogui`
    pub fn java(java_bin: &str, max_heap: &str, min_heap: &str, paths: &InstancePaths) -> Self {
        Self {
            program: java_bin.to_string(),
            args: vec![
                format!("-Xmx{max_heap}"),
                format!("-Xms{min_heap}"),
                "-jar".to_string(),
                paths.server_jar().to_string_lossy().into_owned(),
                "nogui".to_string(),
            ],
            cwd: paths.instance_dir.clone(),
        }
    }

    pub(crate) fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.current_dir(&self.cwd);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn java_launch_has_fixed_shape() {
        let paths = InstancePaths::with_default_backups("/srv/mc");
        let spec = LaunchSpec::java("/usr/bin/java", "4G", "1G", &paths);
        assert_eq!(spec.program, "/usr/bin/java");
        assert_eq!(
            spec.args,
            vec!["-Xmx4G", "-Xms1G", "-jar", "/srv/mc/server.jar", "nogui"]
        );
        assert_eq!(spec.cwd, PathBuf::from("/srv/mc"));
    }
}
