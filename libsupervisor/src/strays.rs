use sysinfo::{ProcessRefreshKind, RefreshKind, Signal, System};
use tracing::{debug, warn};

/// Kills every process whose executable name exactly matches one of `names`,
/// except the calling process. Returns how many were signalled.
///
/// Used to clear daemons left behind by an earlier, crashed run before the
/// harness starts its own instances on the same ports.
pub fn kill_strays<S: AsRef<str>>(names: &[S]) -> usize {
    if names.is_empty() {
        return 0;
    }

    let sys = System::new_with_specifics(
        RefreshKind::new().with_processes(ProcessRefreshKind::new()),
    );
    let own_pid = sysinfo::get_current_pid().ok();

    let mut killed = 0;
    for name in names {
        for process in sys.processes_by_exact_name(name.as_ref()) {
            if Some(process.pid()) == own_pid {
                continue;
            }
            match process.kill_with(Signal::Kill) {
                Some(true) => {
                    debug!(name = name.as_ref(), pid = %process.pid(), "killed stray process");
                    killed += 1;
                }
                _ => warn!(name = name.as_ref(), pid = %process.pid(), "failed to kill stray process"),
            }
        }
    }
    killed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;
    use std::path::Path;
    use std::process::Command;

    #[test]
    fn test_no_names_kills_nothing() {
        let names: [&str; 0] = [];
        assert_eq!(kill_strays(&names), 0);
    }

    #[test]
    fn test_unknown_name_kills_nothing() {
        assert_eq!(kill_strays(&["repobench-no-such-daemon"]), 0);
    }

    #[test]
    fn test_kills_matching_process() {
        let sleep = ["/bin/sleep", "/usr/bin/sleep"]
            .into_iter()
            .map(Path::new)
            .find(|p| p.exists())
            .expect("sleep binary");
        let dir = tempfile::tempdir().unwrap();
        // the process name is taken from the executable path, so a uniquely
        // named symlink gives a process no other test can collide with
        let name = format!("rbstray{}", std::process::id() % 100_000);
        let link = dir.path().join(&name);
        std::os::unix::fs::symlink(sleep, &link).unwrap();

        let mut child = Command::new(&link).arg("30").spawn().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(200));

        assert_eq!(kill_strays(&[name.as_str()]), 1);
        let status = child.wait().unwrap();
        assert_eq!(status.signal(), Some(9));
    }
}
