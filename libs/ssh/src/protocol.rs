//! Remote command wrapping.

use base64::{engine::general_purpose::STANDARD, Engine as _};

/// Prints the remote uid; `0` means no `sudo` prefix is needed.
pub const PRIVILEGE_CHECK: &str = "id -u";

/// Wrap a batch into a single `sh -` invocation.
///
/// The batch is joined with newlines under `set -e`, base64 encoded and
/// decoded remotely, so quoting inside the commands never meets the login
/// shell. `sudo` is the privilege prefix (empty for root).
pub fn wrap_commands(commands: &[String], sudo: &str) -> String {
    let script = format!("#!/bin/sh\nset -e\n{}\n", commands.join("\n"));
    let encoded = STANDARD.encode(script.as_bytes());
    let sudo = sudo.trim();
    if sudo.is_empty() {
        format!("echo \"{}\" | base64 -d | sh -", encoded)
    } else {
        format!("echo \"{}\" | base64 -d | {} sh -", encoded, sudo)
    }
}

/// `sudo` unless `id -u` reported 0.
pub(crate) fn sudo_prefix(uid_output: &str) -> &'static str {
    if uid_output.trim() == "0" {
        ""
    } else {
        "sudo"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn decode(wrapped: &str) -> String {
        let encoded = wrapped
            .strip_prefix("echo \"")
            .and_then(|rest| rest.split('"').next())
            .unwrap();
        String::from_utf8(STANDARD.decode(encoded).unwrap()).unwrap()
    }

    #[test]
    fn test_wrap_as_root() {
        let cmds = vec!["echo 'a b'".to_string(), "cat /etc/hostname".to_string()];
        let wrapped = wrap_commands(&cmds, "");

        assert!(wrapped.ends_with("| base64 -d | sh -"));
        assert_eq!(
            decode(&wrapped),
            "#!/bin/sh\nset -e\necho 'a b'\ncat /etc/hostname\n"
        );
    }

    #[test]
    fn test_wrap_with_sudo() {
        let wrapped = wrap_commands(&["true".to_string()], "sudo");
        assert!(wrapped.ends_with("| base64 -d | sudo sh -"));
    }

    #[rstest]
    #[case("0\n", "")]
    #[case("0", "")]
    #[case("1000\n", "sudo")]
    #[case("", "sudo")]
    fn test_sudo_prefix(#[case] output: &str, #[case] expected: &str) {
        assert_eq!(sudo_prefix(output), expected);
    }
}
