//! Operator console
//!
//! Lines are read on a blocking thread with rustyline and handed to the main
//! loop, which parses them into [`Command`]s and runs them against the
//! [`Session`].

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Result;
use colored::*;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::ConsoleConfig;
use crate::error::PadmapError;
use crate::input::generic;
use crate::mapping::rules;
use crate::session::{Notice, Session, SessionEvent};
use crate::state::{ActionKind, ChannelDef, LayerId, TargetKind, VariableDef};

const PROMPT: &str = "padmap> ";

/// One parsed console line
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    Quit,
    Status,
    Layers,
    Layer(LayerId),
    Mappings(Option<LayerId>),
    Activity { all: bool },
    Watch,
    Channels,
    Variables,
    Notices,
    Refresh,
    Edit { input: String, layer: Option<LayerId> },
    Show,
    Kind(TargetKind),
    Target(Vec<String>),
    Toggle(String),
    Action(ActionKind),
    Param { key: String, value: String },
    Unset(String),
    Save { all_layers: bool },
    Clear { all_layers: bool },
    Cancel,
    Unmap { input: String, channel: String, layer: Option<LayerId> },
    ChannelAdd { name: String, min: Option<f64>, max: Option<f64>, address: Option<String> },
    ChannelSet { name: String, min: f64, max: f64 },
    ChannelRename { name: String, new_name: String },
    ChannelDelete(String),
    VariableAdd { name: String, initial: f64 },
    VariableSet { name: String, initial: f64 },
    VariableDelete(String),
}

/// Parse one console line; `Ok(None)` for blank lines
pub fn parse(line: &str) -> std::result::Result<Option<Command>, String> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let Some((&head, rest)) = words.split_first() else {
        return Ok(None);
    };

    let command = match (head.to_lowercase().as_str(), rest) {
        ("help" | "?", _) => Command::Help,
        ("quit" | "exit", _) => Command::Quit,
        ("status", _) => Command::Status,
        ("layers", _) => Command::Layers,
        ("layer", [id]) => Command::Layer(parse_layer(id)?),
        ("mappings" | "map", []) => Command::Mappings(None),
        ("mappings" | "map", [id]) => Command::Mappings(Some(parse_layer(id)?)),
        ("activity", []) => Command::Activity { all: false },
        ("activity", ["--all"]) => Command::Activity { all: true },
        ("watch", _) => Command::Watch,
        ("channels", _) => Command::Channels,
        ("variables" | "vars", _) => Command::Variables,
        ("notices", _) => Command::Notices,
        ("refresh", _) => Command::Refresh,
        ("edit", [input]) => Command::Edit {
            input: input.to_string(),
            layer: None,
        },
        ("edit", [input, layer]) => Command::Edit {
            input: input.to_string(),
            layer: Some(parse_layer(layer)?),
        },
        ("show", _) => Command::Show,
        ("kind", [kind]) => Command::Kind(
            TargetKind::from_str(kind).ok_or_else(|| format!("unknown target kind '{}'", kind))?,
        ),
        ("target", names) if !names.is_empty() => {
            Command::Target(names.iter().map(|s| s.to_string()).collect())
        }
        ("toggle", [name]) => Command::Toggle(name.to_string()),
        ("action", [action]) => Command::Action(
            ActionKind::from_str(action).ok_or_else(|| format!("unknown action '{}'", action))?,
        ),
        ("param", [key, value]) => Command::Param {
            key: key.to_string(),
            value: value.to_string(),
        },
        ("unset", [key]) => Command::Unset(key.to_string()),
        ("save", flags) => Command::Save {
            all_layers: parse_all_flag(flags)?,
        },
        ("clear", flags) => Command::Clear {
            all_layers: parse_all_flag(flags)?,
        },
        ("cancel", _) => Command::Cancel,
        ("unmap", [input, channel]) => Command::Unmap {
            input: input.to_string(),
            channel: channel.to_string(),
            layer: None,
        },
        ("unmap", [input, channel, layer]) => Command::Unmap {
            input: input.to_string(),
            channel: channel.to_string(),
            layer: Some(parse_layer(layer)?),
        },
        ("channel", args) => parse_channel(args)?,
        ("variable" | "var", args) => parse_variable(args)?,
        _ => return Err(format!("unrecognised command '{}' (try 'help')", line.trim())),
    };
    Ok(Some(command))
}

fn parse_layer(text: &str) -> std::result::Result<LayerId, String> {
    LayerId::from_str(text).ok_or_else(|| format!("unknown layer '{}' (A-D)", text))
}

fn parse_number(text: &str) -> std::result::Result<f64, String> {
    text.parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .ok_or_else(|| format!("'{}' is not a number", text))
}

fn parse_all_flag(flags: &[&str]) -> std::result::Result<bool, String> {
    match flags {
        [] => Ok(false),
        ["--all"] => Ok(true),
        other => Err(format!("unexpected arguments: {}", other.join(" "))),
    }
}

fn parse_channel(args: &[&str]) -> std::result::Result<Command, String> {
    Ok(match args {
        ["add", name] => Command::ChannelAdd {
            name: name.to_string(),
            min: None,
            max: None,
            address: None,
        },
        ["add", name, min, max] => Command::ChannelAdd {
            name: name.to_string(),
            min: Some(parse_number(min)?),
            max: Some(parse_number(max)?),
            address: None,
        },
        ["add", name, min, max, address] => Command::ChannelAdd {
            name: name.to_string(),
            min: Some(parse_number(min)?),
            max: Some(parse_number(max)?),
            address: Some(address.to_string()),
        },
        ["set", name, min, max] => Command::ChannelSet {
            name: name.to_string(),
            min: parse_number(min)?,
            max: parse_number(max)?,
        },
        ["rename", name, new_name] => Command::ChannelRename {
            name: name.to_string(),
            new_name: new_name.to_string(),
        },
        ["delete" | "rm", name] => Command::ChannelDelete(name.to_string()),
        _ => return Err("usage: channel add|set|rename|delete ...".to_string()),
    })
}

fn parse_variable(args: &[&str]) -> std::result::Result<Command, String> {
    Ok(match args {
        ["add", name] => Command::VariableAdd {
            name: name.to_string(),
            initial: 0.0,
        },
        ["add", name, initial] => Command::VariableAdd {
            name: name.to_string(),
            initial: parse_number(initial)?,
        },
        ["set", name, initial] => Command::VariableSet {
            name: name.to_string(),
            initial: parse_number(initial)?,
        },
        ["delete" | "rm", name] => Command::VariableDelete(name.to_string()),
        _ => return Err("usage: variable add|set|delete ...".to_string()),
    })
}

/// Console-local display state
pub struct Console {
    show_inactive: bool,
    watch: bool,
    refresh: Duration,
    last_activity_print: Option<Instant>,
}

/// Whether the main loop should keep going
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

impl Console {
    pub fn new(config: &ConsoleConfig) -> Self {
        Self {
            show_inactive: config.show_inactive,
            watch: false,
            refresh: Duration::from_millis(config.activity_refresh_ms),
            last_activity_print: None,
        }
    }

    /// Parse and run one line
    pub fn handle_line(&mut self, session: &mut Session, line: &str) -> Flow {
        match parse(line) {
            Ok(Some(command)) => self.execute(session, command),
            Ok(None) => Flow::Continue,
            Err(msg) => {
                println!("{}", msg.red());
                Flow::Continue
            }
        }
    }

    pub fn execute(&mut self, session: &mut Session, command: Command) -> Flow {
        let active = session.store().active_layer();

        let outcome: crate::error::Result<()> = match command {
            Command::Quit => return Flow::Quit,
            Command::Help => {
                print_help();
                Ok(())
            }
            Command::Status => {
                self.print_status(session);
                Ok(())
            }
            Command::Layers => {
                print_layers(session);
                Ok(())
            }
            Command::Layer(layer) => {
                let events = session.set_active_layer(layer);
                if events.is_empty() {
                    println!("Viewing layer {}", layer.as_str().bold());
                }
                self.report(session, &events);
                Ok(())
            }
            Command::Mappings(layer) => {
                print_mappings(session, layer.unwrap_or(active));
                Ok(())
            }
            Command::Activity { all } => {
                self.print_activity(session, all || self.show_inactive);
                Ok(())
            }
            Command::Watch => {
                self.watch = !self.watch;
                println!("Activity watch {}", if self.watch { "on" } else { "off" });
                Ok(())
            }
            Command::Channels => {
                print_channels(session);
                Ok(())
            }
            Command::Variables => {
                print_variables(session);
                Ok(())
            }
            Command::Notices => {
                for notice in session.notices().take(10) {
                    print_notice(notice);
                }
                Ok(())
            }
            Command::Refresh => session.request_configuration(),
            Command::Edit { input, layer } => session
                .select_input(layer.unwrap_or(active), &input)
                .map(|_| print_editor(session)),
            Command::Show => {
                print_editor(session);
                Ok(())
            }
            Command::Kind(kind) => session.set_target_kind(kind).map(|_| print_editor(session)),
            Command::Target(names) => session.set_targets(names).map(|_| print_editor(session)),
            Command::Toggle(name) => session.toggle_target(&name).map(|_| print_editor(session)),
            Command::Action(action) => session.set_action(action).map(|_| print_editor(session)),
            Command::Param { key, value } => session
                .set_param(&key, &value)
                .map(|_| print_editor(session)),
            Command::Unset(key) => session.unset_param(&key).map(|_| print_editor(session)),
            Command::Save { all_layers } => session.save(all_layers).map(|_| {
                println!("{}", "Save sent, waiting for backend".dimmed());
            }),
            Command::Clear { all_layers } => session.clear(all_layers).map(|_| {
                println!("{}", "Clear sent, waiting for backend".dimmed());
            }),
            Command::Cancel => {
                if session.cancel() {
                    println!("Edit cancelled");
                }
                Ok(())
            }
            Command::Unmap {
                input,
                channel,
                layer,
            } => session.clear_channel_from_mapping(layer.unwrap_or(active), &input, &channel),
            Command::ChannelAdd {
                name,
                min,
                max,
                address,
            } => session.add_channel(
                &name,
                ChannelDef {
                    min_value: min,
                    max_value: max,
                    osc_address: address,
                    ..Default::default()
                },
            ),
            Command::ChannelSet { name, min, max } => {
                let snapshot = session.store().get();
                let mut channel = snapshot.channel(&name).cloned().unwrap_or_default();
                channel.min_value = Some(min);
                channel.max_value = Some(max);
                session.update_channel(&name, channel)
            }
            Command::ChannelRename { name, new_name } => session
                .rename_channel(&name, &new_name)
                .map(|_| println!("{}", "Rename sent, waiting for backend".dimmed())),
            Command::ChannelDelete(name) => session.delete_channel(&name),
            Command::VariableAdd { name, initial } => session.add_variable(
                &name,
                VariableDef {
                    initial_value: initial,
                    ..Default::default()
                },
            ),
            Command::VariableSet { name, initial } => {
                let snapshot = session.store().get();
                let mut variable = snapshot.variable(&name).cloned().unwrap_or_default();
                variable.initial_value = initial;
                session.update_variable(&name, variable)
            }
            Command::VariableDelete(name) => session.delete_variable(&name),
        };

        if let Err(e) = outcome {
            print_error(&e);
        }
        Flow::Continue
    }

    /// Show what a broadcast changed
    pub fn report(&mut self, session: &Session, events: &[SessionEvent]) {
        for event in events {
            match event {
                SessionEvent::ConfigurationLoaded => {
                    println!("{}", "Configuration loaded".green());
                }
                SessionEvent::ConfigurationUpdated => {
                    debug!("Configuration updated");
                    if session.store().selected_input().is_some() {
                        print_editor(session);
                    }
                }
                // Editor closes silently; the prompt shows it is idle again
                SessionEvent::EditorClosed(_) => {}
                SessionEvent::ActiveLayerChanged(layer) => {
                    println!("Active layer: {}", layer.as_str().bold());
                }
                SessionEvent::ActivityChanged => {
                    if self.watch && self.activity_due() {
                        self.print_activity(session, false);
                    }
                }
                SessionEvent::DefinitionsInstalled(count) => {
                    println!("{}", format!("{} input definitions received", count).dimmed());
                }
                SessionEvent::Status(notice) => print_notice(notice),
                SessionEvent::Connection(true) => println!("{}", "● connected".green()),
                SessionEvent::Connection(false) => println!("{}", "● disconnected".red()),
            }
        }
    }

    fn activity_due(&mut self) -> bool {
        let now = Instant::now();
        match self.last_activity_print {
            Some(last) if now.duration_since(last) < self.refresh => false,
            _ => {
                self.last_activity_print = Some(now);
                true
            }
        }
    }

    fn print_status(&self, session: &Session) {
        let link = if session.is_connected() {
            "connected".green()
        } else {
            "disconnected".red()
        };
        println!("Backend:      {}", link);
        println!(
            "Config:       {}",
            if session.store().is_loaded() {
                "loaded".normal()
            } else {
                "waiting for backend".yellow()
            }
        );
        println!("Active layer: {}", session.store().active_layer());
        match session.store().selected_input() {
            Some(selected) => println!("Editing:      {}:{}", selected.layer, selected.input_id),
            None => println!("Editing:      -"),
        }
        println!("Watch:        {}", if self.watch { "on" } else { "off" });
    }

    fn print_activity(&self, session: &Session, all: bool) {
        let aggregator = session.aggregator();
        if all {
            for id in generic::all_ids() {
                let activity = aggregator.activity(id);
                let marker = if activity.is_active { "●".green() } else { "○".dimmed() };
                println!("  {} {:<20} {:>7.3}", marker, id, activity.value);
            }
            return;
        }

        let active = aggregator.active_ids();
        if active.is_empty() {
            println!("{}", "No active inputs".dimmed());
            return;
        }
        for id in active {
            println!("  {} {:<20} {:>7.3}", "●".green(), id, aggregator.activity(id).value);
        }
    }
}

fn print_error(e: &PadmapError) {
    match e {
        PadmapError::Validation(msg) => println!("{}", msg.yellow()),
        other => println!("{}", other.to_string().red()),
    }
}

fn print_notice(notice: &Notice) {
    let line = format!(
        "[{}] {}: {}",
        notice.at.format("%H:%M:%S"),
        notice.scope.as_str(),
        notice.message
    );
    if notice.success {
        println!("{}", line.green());
    } else {
        println!("{}", line.red());
    }
}

fn print_layers(session: &Session) {
    let snapshot = session.store().get();
    let active = session.store().active_layer();
    for (id, layer) in &snapshot.layers {
        let marker = if *id == active { "▶" } else { " " };
        println!(
            "{} {} {:<20} {} mappings",
            marker,
            id.as_str().bold(),
            layer.name,
            layer.input_mappings.len()
        );
    }
}

fn print_mappings(session: &Session, layer: LayerId) {
    let snapshot = session.store().get();
    let Some(config) = snapshot.layer(layer) else {
        println!("{}", format!("Layer {} does not exist", layer).yellow());
        return;
    };
    println!("{} {}", layer.as_str().bold(), config.name);
    if config.input_mappings.is_empty() {
        println!("  {}", "(no mappings)".dimmed());
    }
    for (input, mapping) in &config.input_mappings {
        let action = mapping
            .action
            .map(|a| a.as_str().to_string())
            .unwrap_or_else(|| "?".to_string());
        let params: Vec<String> = mapping
            .params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        println!(
            "  {:<20} {} {} → {} {}",
            input.cyan(),
            mapping.target_kind.as_str(),
            mapping.target_name,
            action.green(),
            params.join(" ").dimmed()
        );
    }
}

fn print_channels(session: &Session) {
    let snapshot = session.store().get();
    if snapshot.internal_channels.is_empty() {
        println!("{}", "(no channels)".dimmed());
    }
    for (name, channel) in &snapshot.internal_channels {
        let value = session
            .channel_values()
            .get(name)
            .map(|v| v.to_string())
            .unwrap_or_else(|| "-".to_string());
        let range = match (channel.min_value, channel.max_value) {
            (Some(min), Some(max)) => format!("[{} .. {}]", min, max),
            _ => String::new(),
        };
        println!(
            "  {:<20} {:>10} {} {}",
            name.cyan(),
            value,
            range.dimmed(),
            channel.osc_address.as_deref().unwrap_or("")
        );
    }
}

fn print_variables(session: &Session) {
    let snapshot = session.store().get();
    if snapshot.internal_variables.is_empty() {
        println!("{}", "(no variables)".dimmed());
    }
    for (name, variable) in &snapshot.internal_variables {
        let value = session
            .variable_values()
            .get(name)
            .map(|v| v.to_string())
            .unwrap_or_else(|| format!("{}", variable.initial_value));
        println!("  {:<20} {:>10}", name.cyan(), value);
    }
}

fn print_editor(session: &Session) {
    let editor = session.editor();
    let Some(selection) = editor.selection() else {
        println!("{}", "No input selected (use 'edit <input>')".dimmed());
        return;
    };

    println!(
        "{} {}:{} [{}]",
        "Editing".bold(),
        selection.layer,
        selection.input_id.cyan(),
        editor.state().to_string().dimmed()
    );
    let kind = selection.target_kind;
    println!(
        "  kind:    {}",
        kind.map(|k| k.as_str()).unwrap_or("-")
    );
    if let Some(kind) = kind {
        let choices = session.store().get().target_names(kind);
        println!(
            "  target:  {}   {}",
            if selection.targets.is_empty() {
                "-".to_string()
            } else {
                selection.targets.join(", ")
            },
            format!("choices: {}", choices.join(" ")).dimmed()
        );
    }

    let offered: Vec<&str> = selection.available_actions.iter().map(|a| a.as_str()).collect();
    let action = selection.action.map(|a| a.as_str()).unwrap_or("-");
    if selection.action_is_choosable() {
        let choices = format!("choices: {}", offered.join(" "));
        println!("  action:  {}   {}", action.green(), choices.dimmed());
    } else {
        println!("  action:  {}", action.green());
    }

    if let Some(action) = selection.action {
        for spec in rules::params_schema_for(action) {
            let value = selection
                .params
                .get(spec.key)
                .map(|v| v.to_string())
                .unwrap_or_else(|| "-".to_string());
            println!("  {:<8} {} {}", format!("{}:", spec.key), value, spec.label.dimmed());
        }
    }
}

fn print_help() {
    println!("{}", "Viewing".bold());
    println!("  status | layers | layer <A-D> | mappings [layer] | channels | variables");
    println!("  activity [--all] | watch | notices | refresh | quit");
    println!("{}", "Editing".bold());
    println!("  edit <input> [layer]     open an input");
    println!("  kind <channel|variable|layer>");
    println!("  target <name>...         replace targets; toggle <name> adds/removes one");
    println!("  action <action>          param <key> <value>; unset <key>");
    println!("  save [--all] | clear [--all] | cancel | show");
    println!("  unmap <input> <channel> [layer]");
    println!("{}", "Channels and variables".bold());
    println!("  channel add <name> [min max [osc_address]] | channel set <name> <min> <max>");
    println!("  channel rename <name> <new> | channel delete <name>");
    println!("  variable add <name> [initial] | variable set <name> <initial> | variable delete <name>");
}

/// Read console lines on a blocking thread
///
/// The receiver closes on Ctrl-C, Ctrl-D or an unrecoverable terminal error.
pub fn spawn_line_reader(history: Option<PathBuf>) -> Result<mpsc::UnboundedReceiver<String>> {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut rl = DefaultEditor::new()?;
    if let Some(path) = &history {
        let _ = rl.load_history(path);
    }

    std::thread::Builder::new()
        .name("console-input".to_string())
        .spawn(move || {
            loop {
                match rl.readline(PROMPT) {
                    Ok(line) => {
                        if !line.trim().is_empty() {
                            let _ = rl.add_history_entry(line.as_str());
                        }
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
                    Err(e) => {
                        warn!("Console input error: {}", e);
                        break;
                    }
                }
            }
            if let Some(path) = &history {
                if let Err(e) = rl.save_history(path) {
                    debug!("Could not save history: {}", e);
                }
            }
        })?;

    Ok(rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_editing_commands() {
        assert_eq!(parse("   ").unwrap(), None);
        assert_eq!(
            parse("edit LEFT_STICK_X b").unwrap(),
            Some(Command::Edit {
                input: "LEFT_STICK_X".to_string(),
                layer: Some(LayerId::B)
            })
        );
        assert_eq!(
            parse("kind variable").unwrap(),
            Some(Command::Kind(TargetKind::InternalVariable))
        );
        assert_eq!(
            parse("target Pan Tilt").unwrap(),
            Some(Command::Target(vec!["Pan".to_string(), "Tilt".to_string()]))
        );
        assert_eq!(
            parse("action rate").unwrap(),
            Some(Command::Action(ActionKind::Rate))
        );
        assert_eq!(
            parse("save --all").unwrap(),
            Some(Command::Save { all_layers: true })
        );
        assert_eq!(
            parse("clear").unwrap(),
            Some(Command::Clear { all_layers: false })
        );
    }

    #[test]
    fn test_parse_channel_commands() {
        assert_eq!(
            parse("channel add Pan 0 1 /pan").unwrap(),
            Some(Command::ChannelAdd {
                name: "Pan".to_string(),
                min: Some(0.0),
                max: Some(1.0),
                address: Some("/pan".to_string())
            })
        );
        assert_eq!(
            parse("channel set Pan -1 1").unwrap(),
            Some(Command::ChannelSet {
                name: "Pan".to_string(),
                min: -1.0,
                max: 1.0
            })
        );
        assert_eq!(
            parse("channel rename Pan PanFine").unwrap(),
            Some(Command::ChannelRename {
                name: "Pan".to_string(),
                new_name: "PanFine".to_string()
            })
        );
        assert_eq!(
            parse("var add Speed 2.5").unwrap(),
            Some(Command::VariableAdd {
                name: "Speed".to_string(),
                initial: 2.5
            })
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse("layer E").is_err());
        assert!(parse("action spin").is_err());
        assert!(parse("save now").is_err());
        assert!(parse("channel add Pan one two").is_err());
        assert!(parse("frobnicate").is_err());
        assert!(parse("channel rename Pan").is_err());
    }
}
