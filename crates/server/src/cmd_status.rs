//! `agent-avatar status` — check if the server is running.
//! `agent-avatar avatars` — list installed avatars.

use std::path::Path;

use console::style;

use agent_avatar_cli::trigger;

use crate::config::AvatarConfig;
use crate::manifest::discover_avatars;
use crate::paths;

pub async fn run(data_dir: &Path, config: &AvatarConfig) -> anyhow::Result<()> {
    println!();
    println!("  agent-avatar v{}", crate::VERSION);
    println!("  Data dir: {}", data_dir.display());

    let pid_alive = match read_pid(&paths::pid_file_path()) {
        Some(pid) if process_alive(pid) => {
            println!("  PID: {} ({})", pid, style("running").green());
            true
        }
        Some(pid) => {
            println!("  PID file: {} (stale — process not found)", pid);
            false
        }
        None => {
            println!("  PID file: not found");
            false
        }
    };

    let base_url = config.base_url();
    let health_ok = trigger::check_health(&base_url).await;
    if health_ok {
        println!("  Health: {} ({}/health)", style("OK").green(), base_url);
        match trigger::get_state(&base_url).await {
            Ok(record) => println!("  State: {}", style(&record.state).cyan()),
            Err(e) => println!("  State: unavailable ({e})"),
        }
    } else if pid_alive {
        println!("  Health: unreachable (server may be bound to a different address)");
    } else {
        println!("  Health: {}", style("unreachable").red());
    }

    println!();
    if !pid_alive && !health_ok {
        println!("  Server is not running.");
        println!("  Start with: agent-avatar serve");
        println!();
    }
    Ok(())
}

pub fn list_avatars(avatars_dir: &Path) -> anyhow::Result<()> {
    let found = discover_avatars(avatars_dir);

    println!();
    println!("  Avatars in {}", avatars_dir.display());
    println!("    {} (built-in)", style("builtin").cyan());
    for (dir_name, manifest) in &found {
        match manifest {
            Ok(manifest) => println!(
                "    {} — {} ({} states)",
                style(dir_name).cyan(),
                manifest.name,
                manifest.states.len()
            ),
            Err(e) => println!("    {} — {} {}", dir_name, style("invalid:").red(), e),
        }
    }
    println!();
    Ok(())
}

fn read_pid(path: &Path) -> Option<u32> {
    let raw = std::fs::read_to_string(path).ok()?;
    raw.trim().parse().ok().filter(|pid| *pid > 0)
}

fn process_alive(pid: u32) -> bool {
    // kill -0 checks if process exists without sending a signal
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pid_file_parsing() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("agent-avatar.pid");

        assert_eq!(read_pid(&path), None);
        std::fs::write(&path, "1234\n").unwrap();
        assert_eq!(read_pid(&path), Some(1234));
        std::fs::write(&path, "0").unwrap();
        assert_eq!(read_pid(&path), None);
        std::fs::write(&path, "garbage").unwrap();
        assert_eq!(read_pid(&path), None);
    }

    #[test]
    fn own_process_is_alive() {
        assert!(process_alive(std::process::id()));
    }
}
