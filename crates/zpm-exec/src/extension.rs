//! Commands implemented by an external executable.
//!
//! An extension maps a command name to a fixed program line. Each `{key}`
//! placeholder in the argument templates is replaced by the value under `key`
//! in the command's (JSON object) arguments; unknown placeholders are kept.

use std::{collections::HashMap, sync::Arc};

use serde_json::Value;
use tracing::debug;
use zpm_core::{CoreError, ProcessFactory, ProcessManager};
use zpm_model::Command;

use crate::system::{SystemArgs, SystemProcess};

/// Registers `name` as an extension running `exe` in `workdir`.
///
/// Unlike [`ProcessManager::register`], a name clash is reported, not a panic.
pub fn register_extension(
    manager: &ProcessManager,
    name: &str,
    exe: &str,
    workdir: &str,
    args: Vec<String>,
    env: HashMap<String, String>,
) -> Result<(), CoreError> {
    let template = SystemArgs {
        name: exe.to_string(),
        dir: workdir.to_string(),
        args,
        env,
        ..SystemArgs::default()
    };
    manager.router().try_register(name, extension_factory(template))?;
    debug!(target: "zpm.exec.extension", name, exe, "extension registered");
    Ok(())
}

fn extension_factory(template: SystemArgs) -> ProcessFactory {
    Arc::new(move |table, cmd: Command| {
        let args = render(&template, &cmd);
        Arc::new(SystemProcess::with_args(table, cmd, args))
    })
}

/// Substitutes the command's arguments into `template`.
pub fn render(template: &SystemArgs, cmd: &Command) -> SystemArgs {
    let values = match cmd.arguments.as_ref().map(|a| a.as_value()) {
        Some(Value::Object(map)) => Some(map),
        _ => None,
    };

    let mut rendered = template.clone();
    if let Some(values) = values {
        rendered.args = template.args.iter().map(|arg| substitute(arg, values)).collect();
    }
    rendered
}

fn substitute(arg: &str, values: &serde_json::Map<String, Value>) -> String {
    let mut out = String::with_capacity(arg.len());
    let mut rest = arg;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open + 1..];
        let Some(close) = tail.find('}') else {
            rest = &rest[open..];
            break;
        };

        let key = &tail[..close];
        match values.get(key) {
            Some(Value::String(s)) => out.push_str(s),
            Some(Value::Null) => {}
            Some(other) => out.push_str(&other.to_string()),
            None => {
                out.push('{');
                out.push_str(key);
                out.push('}');
            }
        }
        rest = &tail[close + 1..];
    }

    out.push_str(rest);
    out
}
