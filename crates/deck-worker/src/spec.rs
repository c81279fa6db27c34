use std::path::PathBuf;
use std::time::Duration;

/// Everything needed to launch the worker.
#[derive(Clone, Debug, PartialEq)]
pub struct WorkerSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Added on top of the inherited parent environment.
    pub env: Vec<(String, String)>,
    pub working_dir: Option<PathBuf>,
    /// How long the worker may take to exit after stdin closes before it is killed.
    pub stop_grace: Duration,
    /// Output lines longer than this are discarded.
    pub max_line_bytes: usize,
}

impl WorkerSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            working_dir: None,
            stop_grace: Duration::from_secs(3),
            max_line_bytes: 4 * 1024 * 1024,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    pub fn max_line_bytes(mut self, max: usize) -> Self {
        self.max_line_bytes = max;
        self
    }

    /// `program arg1 arg2 ...`, for logs.
    pub fn display_command(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_collects_args_and_env() {
        let spec = WorkerSpec::new("python3")
            .arg("-u")
            .args(["api.py", "--electron"])
            .env("CHROME_DEBUGGING_PORT", "9222")
            .working_dir("/srv/deck")
            .stop_grace(Duration::from_millis(250));
        assert_eq!(spec.args, vec!["-u", "api.py", "--electron"]);
        assert_eq!(spec.env, vec![("CHROME_DEBUGGING_PORT".into(), "9222".into())]);
        assert_eq!(spec.working_dir, Some(PathBuf::from("/srv/deck")));
        assert_eq!(spec.stop_grace, Duration::from_millis(250));
        assert_eq!(spec.display_command(), "python3 -u api.py --electron");
    }
}
