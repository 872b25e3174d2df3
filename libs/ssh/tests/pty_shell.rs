//! Local PTY shells driven through the `Terminal` trait.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use autok3s_ssh::{PtyShell, Terminal, TerminalError, WindowSize};

#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Captured {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_exit_status_and_output() {
    let shell = PtyShell::new("/bin/sh", ["-c", "echo hello-from-pty; exit 3"]);
    let captured = Captured::default();
    shell.set_io(Box::new(captured.clone()));

    shell.open_terminal(WindowSize::new(100, 30)).await.unwrap();
    let code = tokio::time::timeout(Duration::from_secs(10), shell.wait())
        .await
        .expect("shell did not exit")
        .unwrap();

    assert_eq!(code, 3);
    assert!(captured.text().contains("hello-from-pty"));
}

#[tokio::test]
async fn test_window_size_reaches_program() {
    let shell = PtyShell::new("/bin/sh", ["-c", "sleep 0.3; stty size"]);
    let captured = Captured::default();
    shell.set_io(Box::new(captured.clone()));

    shell.open_terminal(WindowSize::new(80, 24)).await.unwrap();
    shell.change_window_size(WindowSize::new(132, 43)).unwrap();
    let code = tokio::time::timeout(Duration::from_secs(10), shell.wait())
        .await
        .expect("shell did not exit")
        .unwrap();

    assert_eq!(code, 0);
    assert!(captured.text().contains("43 132"));
}

#[tokio::test]
async fn test_close_hangs_up_shell() {
    let shell = PtyShell::new("/bin/sh", ["-c", "sleep 30"]);
    shell.set_io(Box::new(io::sink()));

    shell.open_terminal(WindowSize::default()).await.unwrap();
    shell.close().unwrap();
    let code = tokio::time::timeout(Duration::from_secs(10), shell.wait())
        .await
        .expect("shell did not exit after close")
        .unwrap();

    // SIGHUP
    assert_eq!(code, 128 + 1);
}

#[tokio::test]
async fn test_open_twice_rejected() {
    let shell = PtyShell::new("/bin/sh", ["-c", "exit 0"]);
    shell.set_io(Box::new(io::sink()));

    shell.open_terminal(WindowSize::default()).await.unwrap();
    let second = shell.open_terminal(WindowSize::default()).await;
    assert!(matches!(second, Err(TerminalError::AlreadyOpen)));
    shell.wait().await.unwrap();
}
