//! Console commands executed on worker nodes

use super::machine::OsFamily;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Environment variable holding the node-wide shared directory
pub const SHARED_DIR_VAR: &str = "AZ_BATCH_NODE_SHARED_DIR";
/// Environment variable holding the task's working directory
pub const TASK_DIR_VAR: &str = "AZ_BATCH_TASK_WORKING_DIR";

/// One shell invocation on a worker node.
///
/// `base_command` may reference `{shared_dir}` and `{task_dir}`; they are
/// rendered to the node's environment variables for the target OS.
/// Arguments are always quoted, so composition is deterministic and safe to
/// hand to a shell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConsoleCommand {
    pub base_command: String,
    #[serde(default)]
    pub arguments: Vec<String>,
}

impl BatchConsoleCommand {
    pub fn new(base_command: impl Into<String>) -> Self {
        Self {
            base_command: base_command.into(),
            arguments: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.arguments.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.arguments.extend(args.into_iter().map(Into::into));
        self
    }

    /// Compose base command and quoted arguments, whitespace-joined
    pub fn compose(&self, os: OsFamily) -> String {
        let base = render_placeholders(self.base_command.trim(), os);
        std::iter::once(base)
            .chain(self.arguments.iter().map(|arg| quote(arg, os)))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Full command line wrapped in the node's shell
    pub fn command_line(&self, os: OsFamily) -> String {
        wrap_in_shell(&self.compose(os), os)
    }
}

/// A local executable or script plus the name it gets on the node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchExecutableInfo {
    pub local_path: PathBuf,
    pub target_name: String,
}

impl BatchExecutableInfo {
    pub fn new(local_path: impl Into<PathBuf>, target_name: impl Into<String>) -> Self {
        Self {
            local_path: local_path.into(),
            target_name: target_name.into(),
        }
    }

    /// Use the file name of `local_path` as the target name
    pub fn from_path(local_path: impl Into<PathBuf>) -> Option<Self> {
        let local_path = local_path.into();
        let target_name = local_path.file_name()?.to_str()?.to_string();
        Some(Self {
            local_path,
            target_name,
        })
    }
}

pub(crate) fn render_placeholders(template: &str, os: OsFamily) -> String {
    template
        .replace("{shared_dir}", &os.env_ref(SHARED_DIR_VAR))
        .replace("{task_dir}", &os.env_ref(TASK_DIR_VAR))
}

pub(crate) fn quote(arg: &str, os: OsFamily) -> String {
    match os {
        OsFamily::Linux => shell_words::quote(arg).into_owned(),
        OsFamily::Windows => quote_windows(arg),
    }
}

pub(crate) fn wrap_in_shell(command: &str, os: OsFamily) -> String {
    match os {
        OsFamily::Linux => format!("/bin/sh -c {}", shell_words::quote(command)),
        OsFamily::Windows => format!("cmd /c {command}"),
    }
}

fn quote_windows(arg: &str) -> String {
    if !arg.is_empty()
        && !arg
            .chars()
            .any(|c| c.is_whitespace() || "\"&|<>^%()".contains(c))
    {
        return arg.to_string();
    }

    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('"');
    let mut backslashes = 0;
    for c in arg.chars() {
        match c {
            '\\' => backslashes += 1,
            '"' => {
                quoted.extend(std::iter::repeat('\\').take(backslashes * 2 + 1));
                quoted.push('"');
                backslashes = 0;
            }
            _ => {
                quoted.extend(std::iter::repeat('\\').take(backslashes));
                quoted.push(c);
                backslashes = 0;
            }
        }
    }
    quoted.extend(std::iter::repeat('\\').take(backslashes * 2));
    quoted.push('"');
    quoted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_linux_quotes_arguments() {
        let cmd = BatchConsoleCommand::new("python3 {shared_dir}/solve.py")
            .arg("--input")
            .arg("my file.txt")
            .arg("it's");
        let composed = cmd.compose(OsFamily::Linux);
        assert!(composed.starts_with("python3 $AZ_BATCH_NODE_SHARED_DIR/solve.py --input "));
        assert_eq!(
            shell_words::split(&composed).unwrap(),
            vec![
                "python3",
                "$AZ_BATCH_NODE_SHARED_DIR/solve.py",
                "--input",
                "my file.txt",
                "it's"
            ]
        );
    }

    #[test]
    fn test_compose_is_deterministic() {
        let cmd = BatchConsoleCommand::new("run").args(["a", "b c"]);
        assert_eq!(cmd.compose(OsFamily::Linux), cmd.compose(OsFamily::Linux));
    }

    #[test]
    fn test_compose_windows() {
        let cmd = BatchConsoleCommand::new("{shared_dir}\\solver.exe")
            .args(["/q", "C:\\data dir\\", "say \"hi\""]);
        assert_eq!(
            cmd.compose(OsFamily::Windows),
            "%AZ_BATCH_NODE_SHARED_DIR%\\solver.exe /q \"C:\\data dir\\\\\" \"say \\\"hi\\\"\""
        );
    }

    #[test]
    fn test_empty_argument_is_preserved() {
        let cmd = BatchConsoleCommand::new("echo").arg("");
        assert_eq!(cmd.compose(OsFamily::Linux), "echo ''");
        assert_eq!(cmd.compose(OsFamily::Windows), "echo \"\"");
    }

    #[test]
    fn test_command_line_wraps_in_shell() {
        let cmd = BatchConsoleCommand::new("echo").arg("a b");
        let line = cmd.command_line(OsFamily::Linux);
        assert_eq!(
            shell_words::split(&line).unwrap(),
            vec!["/bin/sh", "-c", cmd.compose(OsFamily::Linux).as_str()]
        );
        assert_eq!(cmd.command_line(OsFamily::Windows), "cmd /c echo \"a b\"");
    }

    #[test]
    fn test_executable_from_path() {
        let exe = BatchExecutableInfo::from_path("/opt/tools/solver.sh").unwrap();
        assert_eq!(exe.target_name, "solver.sh");
        assert!(BatchExecutableInfo::from_path("/").is_none());
    }
}
