//! Argument schema binder: composes a command-line schema from the meta
//! tree, parses argv-style tokens and writes the coerced values back into
//! the data-section variables' `value` slots.

use clap::error::ErrorKind as ClapErrorKind;
use clap::{Arg, ArgAction, Command};
use log::warn;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::meta::ObjectMeta;

const DEFAULT_DESCRIPTION: &str = "A simple eBPF program";
const DEFAULT_VERSION: &str = "0.1.0";
const DEFAULT_EPILOG: &str = "Built from a tracepack package.";
/// Short names reserved for help and version, never assigned to variables.
const RESERVED_SHORTS: [char; 2] = ['h', 'v'];
/// Long names clap owns for its built-in flags.
const RESERVED_LONGS: [&str; 2] = ["help", "version"];

/// How an argument-parse run ended. Help and version requests are
/// distinguishable "stop" outcomes so the caller can short-circuit without
/// entering the load path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgOutcome {
    Continue,
    Help,
    Version,
}

struct BoundVar {
    section: usize,
    index: usize,
    /// The option id (the long name).
    id: String,
    ty: String,
    is_flag: bool,
}

fn first_nonempty(value: &str, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}

fn value_to_token(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Parse `args` (the first token is the program name) against the schema the
/// meta tree describes, updating variable values in place.
pub fn parse_args(meta: &mut ObjectMeta, args: &[String]) -> Result<ArgOutcome> {
    let doc = meta.bpf_skel.doc.clone().unwrap_or_default();
    let name = first_nonempty(&meta.bpf_skel.obj_name, "tracepack app");
    let version = first_nonempty(&doc.version, DEFAULT_VERSION);
    let about = first_nonempty(&doc.brief, DEFAULT_DESCRIPTION);
    let epilog = first_nonempty(&doc.details, DEFAULT_EPILOG);

    let mut cmd = Command::new(name)
        .version(version)
        .about(about)
        .after_help(epilog)
        .disable_version_flag(true)
        .arg(
            Arg::new("version")
                .short('v')
                .long("version")
                .action(ArgAction::Version)
                .help("prints version information and exits"),
        );

    let mut bound: Vec<BoundVar> = Vec::new();
    for (si, section) in meta.bpf_skel.data_sections.iter().enumerate() {
        for (vi, var) in section.variables.iter().enumerate() {
            let long = var.cmdarg.long.clone().unwrap_or_else(|| var.name.clone());
            if RESERVED_LONGS.contains(&long.as_str()) {
                warn!("option --{long} for variable {} is reserved, skipping", var.name);
                continue;
            }
            if bound.iter().any(|b| b.id == long) {
                warn!("duplicate option --{long} for variable {}, skipping", var.name);
                continue;
            }
            let help = var
                .cmdarg
                .help
                .clone()
                .or_else(|| var.description.clone())
                .unwrap_or_else(|| format!("set value of bpf variable {}", var.name));
            let mut arg = Arg::new(long.clone()).long(long.clone()).help(help);
            if let Some(short) = var.cmdarg.short.as_deref().and_then(|s| s.chars().next()) {
                if RESERVED_SHORTS.contains(&short) {
                    warn!(
                        "short option -{short} for variable {} is reserved, using --{long} only",
                        var.name
                    );
                } else {
                    arg = arg.short(short);
                }
            }
            let is_flag = var.ty == "bool";
            if is_flag {
                arg = arg.action(ArgAction::SetTrue);
            } else if let Some(default) = var.cmdarg.default.clone().or_else(|| var.value.clone()) {
                arg = arg.default_value(value_to_token(&default));
            }
            cmd = cmd.arg(arg);
            bound.push(BoundVar {
                section: si,
                index: vi,
                id: long,
                ty: var.ty.clone(),
                is_flag,
            });
        }
    }

    let matches = match cmd.try_get_matches_from(args) {
        Ok(matches) => matches,
        Err(err) => {
            return match err.kind() {
                ClapErrorKind::DisplayHelp
                | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                    let _ = err.print();
                    Ok(ArgOutcome::Help)
                }
                ClapErrorKind::DisplayVersion => {
                    let _ = err.print();
                    Ok(ArgOutcome::Version)
                }
                _ => Err(Error::BadArgument(err.to_string())),
            };
        }
    };

    for var in &bound {
        let slot = &mut meta.bpf_skel.data_sections[var.section].variables[var.index];
        if var.is_flag {
            slot.value = Some(Value::Bool(matches.get_flag(&var.id)));
            continue;
        }
        // get_one also yields a registered default, which is exactly the
        // "option carries that default unless overridden" contract.
        let Some(text) = matches.get_one::<String>(&var.id) else {
            continue;
        };
        if let Some(value) = coerce_value(&slot.name, &var.ty, text)? {
            slot.value = Some(value);
        }
    }
    Ok(ArgOutcome::Continue)
}

/// Coerce a textual token per the variable's printable type. Returns
/// `Ok(None)` for types the binder does not know, leaving the slot alone.
fn coerce_value(name: &str, ty: &str, text: &str) -> Result<Option<Value>> {
    let bad = || Error::BadArgumentType {
        name: name.to_string(),
        ty: ty.to_string(),
        value: text.to_string(),
    };
    let value = if ty == "bool" {
        Value::Bool(text.parse::<bool>().map_err(|_| bad())?)
    } else if ty.starts_with("unsigned") {
        Value::from(text.parse::<u64>().map_err(|_| bad())?)
    } else if matches!(ty, "int" | "short" | "long" | "long long") {
        Value::from(text.parse::<i64>().map_err(|_| bad())?)
    } else if ty == "float" || ty == "double" {
        Value::from(text.parse::<f64>().map_err(|_| bad())?)
    } else if ty.starts_with("char[") {
        Value::String(text.to_string())
    } else {
        warn!("unknown variable type `{ty}` for {name}; leaving value unchanged");
        return Ok(None);
    };
    Ok(Some(value))
}

/// Run the binder over a meta document and return the mutated meta as text,
/// for hosts that work with JSON instead of the typed tree.
pub fn parse_args_to_json_config(meta_json: &str, args: &[String]) -> Result<(ArgOutcome, String)> {
    let mut meta = ObjectMeta::from_json_str(meta_json)?;
    let outcome = parse_args(&mut meta, args)?;
    let text = meta.to_json_string()?;
    Ok((outcome, text))
}
