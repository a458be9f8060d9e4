//! Extraction engine invocation.
//!
//! The engine is an opaque process that reads a document on stdin and writes
//! plain text to stdout. For Apache Tika that is
//! `java -jar tika-app.jar --text --pretty-print -`.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

/// Arguments that put `tika-app` in text mode reading from stdin.
pub const TIKA_TEXT_ARGS: [&str; 3] = ["--text", "--pretty-print", "-"];

/// Program plus fixed argument list for the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineCommand {
    program: PathBuf,
    args: Vec<String>,
}

impl EngineCommand {
    /// Any program that follows the stdin-to-stdout contract
    pub fn new<I, S>(program: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// `java -jar <jar> --text --pretty-print -`
    pub fn tika_app(java: impl Into<PathBuf>, jar: &Path) -> Self {
        Self::tika_app_with_jvm_args(java, jar, &[])
    }

    /// Like [`tika_app`](Self::tika_app) with extra JVM arguments
    /// (e.g. "-Xmx2g") placed before `-jar`.
    ///
    /// `-Djava.awt.headless=true` is always set.
    pub fn tika_app_with_jvm_args(java: impl Into<PathBuf>, jar: &Path, jvm_args: &[String]) -> Self {
        let mut args: Vec<String> = jvm_args.to_vec();
        if !jvm_args.iter().any(|arg| arg.starts_with("-Djava.awt.headless")) {
            args.push("-Djava.awt.headless=true".to_string());
        }
        args.push("-jar".to_string());
        args.push(jar.display().to_string());
        args.extend(TIKA_TEXT_ARGS.iter().map(|a| a.to_string()));

        Self {
            program: java.into(),
            args,
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Command line for logs
    pub fn describe(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    /// All three standard streams piped; the process is killed if its handle
    /// is dropped.
    pub(crate) fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tika_app_argument_shape() {
        let cmd = EngineCommand::tika_app("java", Path::new("/opt/tika/tika-app.jar"));
        assert_eq!(cmd.program(), Path::new("java"));
        assert_eq!(
            cmd.args(),
            &[
                "-Djava.awt.headless=true",
                "-jar",
                "/opt/tika/tika-app.jar",
                "--text",
                "--pretty-print",
                "-",
            ]
        );
    }

    #[test]
    fn test_jvm_args_come_before_jar() {
        let cmd = EngineCommand::tika_app_with_jvm_args(
            "/usr/bin/java",
            Path::new("tika.jar"),
            &["-Xmx2g".to_string(), "-Djava.awt.headless=false".to_string()],
        );
        assert_eq!(
            cmd.describe(),
            "/usr/bin/java -Xmx2g -Djava.awt.headless=false -jar tika.jar --text --pretty-print -"
        );
    }
}
