//! `agent-avatar install-hooks` / `uninstall-hooks` — wire agent hooks to `set`.
//!
//! Safely merges agent-avatar hook entries into `~/.claude/settings.json`.

use std::path::{Path, PathBuf};

use console::style;
use serde_json::{json, Map, Value};

/// Hook event, optional tool matcher, and the state it sets.
const HOOK_BINDINGS: &[(&str, Option<&str>, &str)] = &[
    ("SessionStart", None, "idle"),
    ("UserPromptSubmit", None, "thinking"),
    ("PreToolUse", Some("Bash"), "bash"),
    ("PreToolUse", Some("Edit|Write|MultiEdit|NotebookEdit"), "writing"),
    ("PostToolUseFailure", None, "error"),
    ("Notification", None, "waiting"),
    ("Stop", None, "success"),
    ("SessionEnd", None, "idle"),
];

const COMMAND_MARKER: &str = "agent-avatar";

#[derive(Debug, Default, PartialEq, Eq)]
pub struct HookChanges {
    pub added: Vec<String>,
    pub updated: Vec<String>,
}

fn default_settings_path() -> anyhow::Result<PathBuf> {
    Ok(dirs::home_dir()
        .ok_or_else(|| anyhow::anyhow!("HOME not found"))?
        .join(".claude/settings.json"))
}

/// Command line a hook runs, e.g. `/usr/local/bin/agent-avatar set bash --quiet`.
fn hook_command(binary: &str, state: &str) -> String {
    format!("{binary} set {state} --quiet")
}

/// Absolute path of the running binary when it is the installed
/// `agent-avatar`, otherwise the bare name resolved through `PATH`.
fn hook_binary() -> String {
    std::env::current_exe()
        .ok()
        .filter(|p| p.file_name().and_then(|n| n.to_str()) == Some(COMMAND_MARKER))
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|| COMMAND_MARKER.to_string())
}

fn is_avatar_command(command: &str) -> bool {
    command.contains(COMMAND_MARKER) && command.contains(" set ")
}

fn entry_is_ours(entry: &Value) -> bool {
    entry
        .get("hooks")
        .and_then(Value::as_array)
        .map(|hooks| {
            hooks.iter().any(|h| {
                h.get("command")
                    .and_then(Value::as_str)
                    .is_some_and(is_avatar_command)
            })
        })
        .unwrap_or(false)
}

fn entry_matcher(entry: &Value) -> Option<&str> {
    entry.get("matcher").and_then(Value::as_str)
}

fn hooks_object(settings: &mut Value) -> anyhow::Result<&mut Map<String, Value>> {
    let obj = settings
        .as_object_mut()
        .ok_or_else(|| anyhow::anyhow!("settings.json is not a JSON object"))?;
    obj.entry("hooks")
        .or_insert_with(|| json!({}))
        .as_object_mut()
        .ok_or_else(|| anyhow::anyhow!("settings.json 'hooks' is not an object"))
}

/// Add or refresh one entry per binding. Unrelated entries are left alone.
pub fn merge_hooks(settings: &mut Value, binary: &str) -> anyhow::Result<HookChanges> {
    let hooks = hooks_object(settings)?;
    let mut changes = HookChanges::default();

    for &(event, matcher, state) in HOOK_BINDINGS {
        let mut entry = json!({
            "hooks": [{
                "type": "command",
                "command": hook_command(binary, state),
                "async": true
            }]
        });
        if let Some(matcher) = matcher {
            entry["matcher"] = json!(matcher);
        }
        let label = match matcher {
            Some(m) => format!("{event}[{m}]"),
            None => event.to_string(),
        };

        let list = hooks.entry(event).or_insert_with(|| json!([]));
        let arr = list
            .as_array_mut()
            .ok_or_else(|| anyhow::anyhow!("settings.json hook '{}' is not an array", event))?;

        let existing = arr
            .iter()
            .position(|e| entry_is_ours(e) && entry_matcher(e) == matcher);
        match existing {
            Some(idx) => {
                if arr[idx] != entry {
                    arr[idx] = entry;
                    changes.updated.push(label);
                }
            }
            None => {
                arr.push(entry);
                changes.added.push(label);
            }
        }
    }

    Ok(changes)
}

/// Drop every agent-avatar entry. Events left empty are removed.
pub fn remove_hooks(settings: &mut Value) -> usize {
    let Some(hooks) = settings.get_mut("hooks").and_then(Value::as_object_mut) else {
        return 0;
    };

    let mut removed = 0;
    hooks.retain(|_, list| {
        let Some(arr) = list.as_array_mut() else {
            return true;
        };
        let before = arr.len();
        arr.retain(|e| !entry_is_ours(e));
        removed += before - arr.len();
        !(arr.is_empty() && before > 0)
    });
    removed
}

fn read_settings(path: &Path) -> anyhow::Result<Value> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str::<Value>(&content)?)
    } else {
        Ok(json!({}))
    }
}

fn write_settings(path: &Path, settings: &Value) -> anyhow::Result<()> {
    if path.exists() {
        let backup = path.with_extension("json.bak");
        std::fs::copy(path, &backup)?;
        println!("  Backed up {} → {}", path.display(), backup.display());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(settings)?)?;
    Ok(())
}

pub fn install(settings_path: Option<&Path>) -> anyhow::Result<()> {
    let settings_file = match settings_path {
        Some(p) => p.to_path_buf(),
        None => default_settings_path()?,
    };
    let binary = hook_binary();

    let mut settings = read_settings(&settings_file)?;
    let changes = merge_hooks(&mut settings, &binary)?;

    if changes.added.is_empty() && changes.updated.is_empty() {
        println!();
        println!("  Hooks already installed in {}", settings_file.display());
        println!();
        return Ok(());
    }

    write_settings(&settings_file, &settings)?;

    println!();
    if !changes.added.is_empty() {
        println!("  Added {} hook(s):", changes.added.len());
        for h in &changes.added {
            println!("    {} {}", style("+").green(), h);
        }
    }
    if !changes.updated.is_empty() {
        println!("  Updated {} hook(s):", changes.updated.len());
        for h in &changes.updated {
            println!("    {} {}", style("~").yellow(), h);
        }
    }
    println!();
    println!("  Settings written to {}", settings_file.display());
    println!();

    Ok(())
}

pub fn uninstall(settings_path: Option<&Path>) -> anyhow::Result<()> {
    let settings_file = match settings_path {
        Some(p) => p.to_path_buf(),
        None => default_settings_path()?,
    };
    if !settings_file.exists() {
        println!("  No settings file at {}", settings_file.display());
        return Ok(());
    }

    let mut settings = read_settings(&settings_file)?;
    let removed = remove_hooks(&mut settings);
    if removed == 0 {
        println!("  No agent-avatar hooks found in {}", settings_file.display());
        return Ok(());
    }

    write_settings(&settings_file, &settings)?;
    println!();
    println!(
        "  Removed {} hook(s) from {}",
        style(removed).red(),
        settings_file.display()
    );
    println!();
    Ok(())
}
