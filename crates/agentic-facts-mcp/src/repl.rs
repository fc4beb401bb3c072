//! Interactive REPL over an in-process fact engine.
//!
//! Launch with `agentic-facts-mcp repl`. Type `/help` for available
//! commands, Tab for completion.

use rustyline::completion::{Completer, Pair};
use rustyline::config::CompletionType;
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::{
    Cmd, ConditionalEventHandler, Config, Editor, Event, EventContext, EventHandler, Helper,
    KeyEvent, RepeatCount,
};

use agentic_facts::rules::Term;
use agentic_facts::{parse_query, Engine, FactInput, RuleId};

use crate::config::{check_rule_file, engine_config, resolve_capacity, resolve_schema_path};
use crate::tools::ToolRegistry;

/// Available REPL commands.
const COMMANDS: &[(&str, &str)] = &[
    ("/push", "Store a ground fact, e.g. /push loaded(\"/home\", 200)"),
    ("/query", "Answer a pattern, e.g. /query ready(X)"),
    ("/rule", "Install rules, e.g. /rule ready(X) :- loaded(X)."),
    ("/rules", "List installed rules"),
    ("/remove", "Remove a rule submission by id"),
    ("/check", "Validate a .mg rule file"),
    ("/stats", "Show engine statistics"),
    ("/info", "Show server capabilities and tools"),
    ("/tools", "List available MCP tools"),
    ("/clear", "Clear the screen"),
    ("/help", "Show available commands"),
    ("/exit", "Quit the REPL"),
];

/// REPL helper for tab completion.
#[derive(Default)]
struct FactsHelper;

impl Completer for FactsHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &rustyline::Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let input = &line[..pos];

        if !input.contains(' ') {
            let matches: Vec<Pair> = COMMANDS
                .iter()
                .filter(|(cmd, _)| cmd.starts_with(input))
                .map(|(cmd, desc)| Pair {
                    display: format!("{cmd:<16} {desc}"),
                    replacement: format!("{cmd} "),
                })
                .collect();
            return Ok((0, matches));
        }

        let (cmd, args) = input.split_once(' ').unwrap_or((input, ""));
        if cmd == "/check" {
            let prefix_start = input.len() - args.len();
            let matches: Vec<Pair> = rule_files()
                .into_iter()
                .filter(|f| f.starts_with(args.trim()))
                .map(|f| Pair {
                    display: f.clone(),
                    replacement: format!("{f} "),
                })
                .collect();
            return Ok((prefix_start, matches));
        }

        Ok((pos, Vec::new()))
    }
}

/// `.mg` files in the working directory and `.agentic-facts/`.
fn rule_files() -> Vec<String> {
    let mut files = Vec::new();
    for dir in [".", ".agentic-facts"] {
        let Ok(entries) = std::fs::read_dir(dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "mg") {
                let shown = path.strip_prefix(".").unwrap_or(&path);
                files.push(shown.display().to_string());
            }
        }
    }
    files.sort();
    files
}

impl Hinter for FactsHelper {
    type Hint = String;

    fn hint(&self, line: &str, pos: usize, _ctx: &rustyline::Context<'_>) -> Option<String> {
        if pos < line.len() || line.is_empty() {
            return None;
        }
        if line.starts_with('/') && !line.contains(' ') {
            for (cmd, _) in COMMANDS {
                if cmd.starts_with(line) && *cmd != line {
                    return Some(cmd[line.len()..].to_string());
                }
            }
        }
        None
    }
}

impl Highlighter for FactsHelper {}
impl Validator for FactsHelper {}
impl Helper for FactsHelper {}

struct TabCompleteOrAcceptHint;

impl ConditionalEventHandler for TabCompleteOrAcceptHint {
    fn handle(
        &self,
        _evt: &Event,
        _n: RepeatCount,
        _positive: bool,
        ctx: &EventContext<'_>,
    ) -> Option<Cmd> {
        if ctx.has_hint() {
            Some(Cmd::CompleteHint)
        } else {
            Some(Cmd::Complete)
        }
    }
}

/// Run the interactive REPL. Must be called inside a tokio runtime, which
/// hosts the engine's dispatcher.
pub fn run(schema: Option<&str>, capacity: Option<usize>) -> anyhow::Result<()> {
    let engine = Engine::new(engine_config(
        resolve_schema_path(schema),
        resolve_capacity(capacity),
    ))?;

    eprintln!();
    eprintln!(
        "  \x1b[32m\u{25c9}\x1b[0m \x1b[1magentic-facts-mcp v{}\x1b[0m \x1b[90m\u{2014} Live Facts for AI Agents\x1b[0m",
        env!("CARGO_PKG_VERSION")
    );
    eprintln!();
    eprintln!(
        "    Press \x1b[36m/\x1b[0m to browse commands, \x1b[90mTab\x1b[0m to complete, \x1b[90m/exit\x1b[0m to quit."
    );
    eprintln!();

    let config = Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .completion_type(CompletionType::List)
        .completion_prompt_limit(20)
        .build();

    let mut rl: Editor<FactsHelper, rustyline::history::DefaultHistory> =
        Editor::with_config(config)?;
    rl.set_helper(Some(FactsHelper));
    rl.bind_sequence(
        KeyEvent::from('\t'),
        EventHandler::Conditional(Box::new(TabCompleteOrAcceptHint)),
    );

    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string());
    let hist_path = std::path::PathBuf::from(&home).join(".agentic_facts_mcp_history");
    if hist_path.exists() {
        let _ = rl.load_history(&hist_path);
    }

    let prompt = " \x1b[36mfacts>\x1b[0m ";

    loop {
        match rl.readline(prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let input = line.strip_prefix('/').unwrap_or(line);
                if input.is_empty() {
                    cmd_help();
                    continue;
                }

                let (cmd, args) = input.split_once(' ').unwrap_or((input, ""));
                let args = args.trim();

                match cmd {
                    "exit" | "quit" => {
                        eprintln!("  \x1b[90m\u{2728}\x1b[0m Goodbye!");
                        break;
                    }
                    "help" | "h" | "?" => cmd_help(),
                    "clear" | "cls" => eprint!("\x1b[2J\x1b[H"),
                    "push" => cmd_push(args, &engine),
                    "query" | "q" => cmd_query(args, &engine),
                    "rule" => cmd_rule(args, &engine),
                    "rules" => cmd_rules(&engine),
                    "remove" => cmd_remove(args, &engine),
                    "check" => cmd_check(args),
                    "stats" => cmd_stats(&engine),
                    "info" => cmd_info(),
                    "tools" => cmd_tools(),
                    _ => {
                        eprintln!("  Unknown command '/{cmd}'. Type /help for commands.");
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                eprintln!("  \x1b[90m(Ctrl+C)\x1b[0m Type \x1b[1m/exit\x1b[0m to quit.");
            }
            Err(ReadlineError::Eof) => {
                eprintln!("  \x1b[90m\u{2728}\x1b[0m Goodbye!");
                break;
            }
            Err(err) => {
                eprintln!("  Error: {err}");
                break;
            }
        }
    }

    let _ = rl.save_history(&hist_path);
    engine.shutdown();

    Ok(())
}

fn cmd_help() {
    eprintln!();
    eprintln!("  Commands:");
    eprintln!();
    for (cmd, desc) in COMMANDS {
        eprintln!("    {cmd:<18} {desc}");
    }
    eprintln!();
    eprintln!("  Tip: Tab completion works for commands and .mg files.");
    eprintln!();
}

/// Turn `pred(c1, c2)` into a fact; every argument must be a constant.
fn ground_fact(text: &str) -> Result<FactInput, String> {
    let atom = parse_query(text.trim_end_matches('.')).map_err(|e| e.to_string())?;
    let args = atom
        .args
        .iter()
        .map(|term| match term {
            Term::Const(value) => Ok(value.clone()),
            other => Err(format!("'{other}' is not a constant")),
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(FactInput::new(atom.predicate, args).from_origin("repl"))
}

fn cmd_push(args: &str, engine: &Engine) {
    if args.is_empty() {
        eprintln!("  Usage: /push <predicate>(<value>, ...)");
        return;
    }
    match ground_fact(args) {
        Ok(fact) => {
            let outcome = engine.push(vec![fact]);
            match outcome.rejected.first() {
                Some(rejected) => eprintln!("  Rejected: {}", rejected.reason),
                None => eprintln!("  Stored."),
            }
        }
        Err(e) => eprintln!("  Cannot push: {e}"),
    }
}

fn cmd_query(args: &str, engine: &Engine) {
    if args.is_empty() {
        eprintln!("  Usage: /query <pattern>");
        return;
    }
    match engine.query(args.trim_end_matches('.')) {
        Ok(bindings) if bindings.is_empty() => eprintln!("  No answers."),
        Ok(bindings) => {
            eprintln!();
            for binding in &bindings {
                let row: Vec<String> = binding.iter().map(|(k, v)| format!("{k} = {v}")).collect();
                if row.is_empty() {
                    eprintln!("    true");
                } else {
                    eprintln!("    {}", row.join(", "));
                }
            }
            eprintln!();
            eprintln!("  {} answer(s)", bindings.len());
        }
        Err(e) => eprintln!("  Query failed: {e}"),
    }
}

fn cmd_rule(args: &str, engine: &Engine) {
    if args.is_empty() {
        eprintln!("  Usage: /rule <head> :- <body>.");
        return;
    }
    match engine.submit_rule(args) {
        Ok(id) => eprintln!("  Installed rule {id}"),
        Err(e) => eprintln!("  Rejected: {e}"),
    }
}

fn cmd_rules(engine: &Engine) {
    let rules = engine.list_rules();
    if rules.is_empty() {
        eprintln!("  No rules installed.");
        return;
    }
    eprintln!();
    for rule in &rules {
        eprintln!("  [{}] {:?}", rule.id, rule.origin);
        for line in rule.source.lines() {
            eprintln!("      {line}");
        }
    }
    eprintln!();
}

fn cmd_remove(args: &str, engine: &Engine) {
    let Ok(id) = args.parse::<u64>() else {
        eprintln!("  Usage: /remove <rule id>");
        return;
    };
    match engine.remove_rule(RuleId(id)) {
        Ok(()) => eprintln!("  Removed rule {id}"),
        Err(e) => eprintln!("  Cannot remove: {e}"),
    }
}

fn cmd_check(args: &str) {
    let Some(path) = args.split_whitespace().next() else {
        eprintln!("  Usage: /check <file.mg>");
        return;
    };
    match check_rule_file(std::path::Path::new(path)) {
        Ok(summary) => {
            eprintln!();
            eprintln!("  Valid rule file: {path}");
            eprintln!("    Rules:        {}", summary.rules);
            eprintln!("    Declarations: {}", summary.declarations);
            eprintln!();
        }
        Err(e) => eprintln!("  Invalid rule file: {e}"),
    }
}

fn cmd_stats(engine: &Engine) {
    let stats = engine.stats();
    eprintln!();
    eprintln!("  Facts:         {}", stats.store.total_facts);
    eprintln!("  Evicted:       {}", stats.store.evicted);
    eprintln!("  Rules:         {} in {} groups", stats.rules, stats.rule_groups);
    eprintln!("  Generation:    {}", stats.generation);
    eprintln!("  Pending waits: {}", stats.pending_waits);
    for (predicate, p) in &stats.store.predicates {
        eprintln!("    {predicate:<20} {}/{}", p.count, p.capacity);
    }
    eprintln!();
}

fn cmd_info() {
    let capabilities = crate::types::InitializeResult::default_result();
    let tools = ToolRegistry::list_tools();
    eprintln!();
    eprintln!(
        "  Server:   {} v{}",
        capabilities.server_info.name, capabilities.server_info.version
    );
    eprintln!("  Protocol: {}", capabilities.protocol_version);
    eprintln!("  Tools:    {}", tools.len());
    eprintln!();
}

fn cmd_tools() {
    let tools = ToolRegistry::list_tools();
    eprintln!();
    eprintln!("  {} MCP tools available:", tools.len());
    eprintln!();
    for tool in &tools {
        eprintln!(
            "    {:<28} {}",
            tool.name,
            tool.description.as_deref().unwrap_or("")
        );
    }
    eprintln!();
}
