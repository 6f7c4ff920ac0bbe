//! Command-line surface over [`EssayWriter`].
//!
//! Each invocation opens the configured database, runs one command and
//! exits, so a session can be paused in one call and resumed in the next.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use miette::{IntoDiagnostic, Result, WrapErr, miette};
use serde_json::Value;

use crate::config::AppConfig;
use crate::essay::{EssayWriter, SessionOptions, StepOutcome};
use crate::event_bus::EventBus;
use crate::providers::LlmBackend;
use crate::runtimes::{CheckpointerType, HistoryEntry, StateView};
use crate::state::StateField;
use crate::store::{EssayRecord, EssaySort, EssayStore, SqliteEssayStore, UserPreferences};

#[derive(Debug, Parser)]
#[command(name = "essay-graph", version)]
#[command(about = "Plan, research, draft and revise essays with checkpointed LLM steps")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Args)]
pub struct GlobalArgs {
    /// SQLite URL for checkpoints and essays
    #[arg(long, global = true, env = "ESSAY_DATABASE_URL")]
    pub database_url: Option<String>,

    /// Checkpoint backend: sqlite or memory
    #[arg(long, global = true, env = "ESSAY_CHECKPOINTER")]
    pub checkpointer: Option<CheckpointerType>,

    /// LLM backend: groq or ollama
    #[arg(long, global = true, env = "ESSAY_LLM_PROVIDER")]
    pub provider: Option<LlmBackend>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create an essay and run until the first pause point or the end
    Start {
        #[arg(long)]
        user: i64,
        #[arg(long)]
        topic: String,
        #[arg(long)]
        max_revisions: Option<u32>,
        /// Steps to pause after, comma separated
        #[arg(long, value_delimiter = ',')]
        pause_after: Option<Vec<String>>,
        /// Completion model; defaults to the user's preferred model
        #[arg(long)]
        model: Option<String>,
    },

    /// Resume a session until it pauses again or finishes
    Continue {
        #[arg(long)]
        session: String,
    },

    /// Run exactly one step
    Step {
        #[arg(long)]
        session: String,
    },

    /// Print the latest state of a session
    State {
        #[arg(long)]
        session: String,
        /// Print a single field
        #[arg(long)]
        field: Option<String>,
    },

    /// Overwrite one state field
    Edit {
        #[arg(long)]
        session: String,
        #[arg(long)]
        field: String,
        #[arg(long, conflicts_with = "file", required_unless_present = "file")]
        value: Option<String>,
        /// Read the value from a file
        #[arg(long)]
        file: Option<PathBuf>,
        /// Step the edit is attributed to
        #[arg(long)]
        as_node: Option<String>,
    },

    /// Print the checkpoint history, newest first
    History {
        #[arg(long)]
        session: String,
    },

    /// List a user's essays
    Essays {
        #[arg(long)]
        user: i64,
        #[arg(long, default_value = "updated")]
        sort: EssaySort,
    },

    /// Show one essay with its session and text
    Essay {
        #[arg(long)]
        user: i64,
        #[arg(long)]
        id: i64,
    },

    /// Delete one of a user's essays
    DeleteEssay {
        #[arg(long)]
        user: i64,
        #[arg(long)]
        id: i64,
    },

    /// Print or update a user's preferences
    Prefs {
        #[arg(long)]
        user: i64,
        #[arg(long)]
        max_revisions: Option<u32>,
        #[arg(long)]
        model: Option<String>,
        #[arg(long, value_delimiter = ',')]
        pause_after: Option<Vec<String>>,
    },

    /// Print the valid step names
    Steps,
}

impl Cli {
    fn config(&self) -> Result<AppConfig> {
        let mut config = AppConfig::from_env()?;
        if let Some(url) = &self.global.database_url {
            config.database_url = url.clone();
        }
        if let Some(checkpointer) = self.global.checkpointer {
            config.checkpointer = checkpointer;
        }
        if let Some(provider) = self.global.provider {
            config.llm_provider = provider;
        }
        Ok(config)
    }
}

/// Converts a raw CLI value into the JSON shape `field` expects.
///
/// Text fields take the value verbatim. `queries` accepts a JSON array or
/// one query per line.
pub fn parse_field_value(field: StateField, raw: &str) -> Result<Value> {
    match field {
        StateField::Queries => {
            if let Ok(value @ Value::Array(_)) = serde_json::from_str::<Value>(raw) {
                return Ok(value);
            }
            Ok(Value::from(
                raw.lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(str::to_string)
                    .collect::<Vec<_>>(),
            ))
        }
        StateField::RevisionNumber | StateField::MaxRevisions | StateField::Count => {
            let n: u32 = raw
                .trim()
                .parse()
                .into_diagnostic()
                .wrap_err_with(|| format!("{field} must be a non-negative integer"))?;
            Ok(Value::from(n))
        }
        _ => Ok(Value::String(raw.to_string())),
    }
}

/// Resolves the model for `start`: flag, then `ESSAY_MODEL`, then the
/// user's stored preference.
async fn start_model(config: &AppConfig, user: i64, flag: Option<String>) -> Result<String> {
    if let Some(model) = flag.or_else(|| config.model.clone()) {
        return Ok(model);
    }
    if config.checkpointer == CheckpointerType::SQLite {
        let store = SqliteEssayStore::connect(&config.database_url).await?;
        return Ok(store.get_preferences(user).await?.preferred_model);
    }
    Ok(config.model_or_default().to_string())
}

/// Session options for `start`. The revision limit comes from the flag,
/// then `ESSAY_MAX_REVISIONS`; anything still unset falls back to the
/// user's preferences.
fn start_options(
    config: &AppConfig,
    max_revisions: Option<u32>,
    pause_after: Option<Vec<String>>,
) -> SessionOptions {
    SessionOptions {
        max_revisions: max_revisions.or(config.max_revisions),
        interrupt_after: pause_after,
    }
}

async fn open_writer(config: &AppConfig, model: &str) -> Result<EssayWriter> {
    let llm = config.language_model(model)?;
    let search = config.search_provider()?;
    let writer =
        EssayWriter::connect(llm, search, &config.runtime_config(), EventBus::default()).await?;
    Ok(writer)
}

pub async fn run(cli: Cli) -> Result<()> {
    let config = cli.config()?;
    let model = match &cli.command {
        Command::Start { user, model, .. } => start_model(&config, *user, model.clone()).await?,
        _ => config.model_or_default().to_string(),
    };
    let writer = open_writer(&config, &model).await?;
    let result = execute(&writer, &config, cli.command).await;
    writer.shutdown().await;
    result
}

async fn execute(writer: &EssayWriter, config: &AppConfig, command: Command) -> Result<()> {
    match command {
        Command::Start {
            user,
            topic,
            max_revisions,
            pause_after,
            ..
        } => {
            config.require_provider_keys()?;
            let options = start_options(config, max_revisions, pause_after);
            let started = writer.start_essay(user, &topic, options).await?;
            if let Some(essay) = &started.essay {
                println!("essay {} \"{}\"", essay.id, essay.title);
            }
            print_outcome(&started.outcome)
        }
        Command::Continue { session } => {
            config.require_provider_keys()?;
            print_outcome(&writer.continue_session(&session).await)
        }
        Command::Step { session } => {
            config.require_provider_keys()?;
            print_outcome(&writer.run_step(&session).await)
        }
        Command::State { session, field } => {
            let view = writer.get_state(&session).await?;
            match field {
                Some(name) => {
                    let field: StateField = name.parse()?;
                    print_value(&view.values.get(field));
                }
                None => print_state(&view)?,
            }
            Ok(())
        }
        Command::Edit {
            session,
            field,
            value,
            file,
            as_node,
        } => {
            let raw = match (value, file) {
                (Some(value), _) => value,
                (None, Some(path)) => tokio::fs::read_to_string(&path)
                    .await
                    .into_diagnostic()
                    .wrap_err_with(|| format!("reading {}", path.display()))?,
                (None, None) => return Err(miette!("pass --value or --file")),
            };
            let parsed: StateField = field.parse()?;
            let value = parse_field_value(parsed, &raw)?;
            let view = writer
                .update_state(&session, &field, value, as_node.as_deref())
                .await?;
            println!(
                "updated {field} at step {} (as {}); next: {}",
                view.step,
                view.writer.as_deref().unwrap_or("-"),
                join_or_end(&view.next)
            );
            Ok(())
        }
        Command::History { session } => {
            for entry in writer.history(&session).await? {
                print_history_entry(&entry);
            }
            Ok(())
        }
        Command::Essays { user, sort } => {
            for essay in writer.list_essays(user, sort).await? {
                print_essay(&essay);
            }
            Ok(())
        }
        Command::Essay { user, id } => {
            let essay = writer.user_essay(user, id).await?;
            print!("{}", essay_detail(&essay));
            Ok(())
        }
        Command::DeleteEssay { user, id } => {
            writer.delete_essay(user, id).await?;
            println!("deleted essay {id}");
            Ok(())
        }
        Command::Prefs {
            user,
            max_revisions,
            model,
            pause_after,
        } => {
            let mut prefs = writer.preferences(user).await?;
            let changed = max_revisions.is_some() || model.is_some() || pause_after.is_some();
            if changed {
                prefs = UserPreferences {
                    default_max_revisions: max_revisions.unwrap_or(prefs.default_max_revisions),
                    preferred_model: model.unwrap_or(prefs.preferred_model),
                    default_interrupt_after: pause_after.unwrap_or(prefs.default_interrupt_after),
                    ..prefs
                };
                writer.save_preferences(&prefs).await?;
            }
            println!("max_revisions: {}", prefs.default_max_revisions);
            println!("model: {}", prefs.preferred_model);
            println!("pause_after: {}", prefs.default_interrupt_after.join(","));
            Ok(())
        }
        Command::Steps => {
            println!("{}", writer.steps().await.join("\n"));
            Ok(())
        }
    }
}

fn join_or_end(next: &[String]) -> String {
    if next.is_empty() {
        "END".to_string()
    } else {
        next.join(", ")
    }
}

fn print_outcome(outcome: &StepOutcome) -> Result<()> {
    if !outcome.success {
        return Err(miette!(
            "session {}: {}",
            outcome.session_id,
            outcome.error.as_deref().unwrap_or("unknown error")
        ));
    }
    println!("session: {}", outcome.session_id);
    println!("step: {}", outcome.step);
    if !outcome.ran.is_empty() {
        println!("ran: {}", outcome.ran.join(", "));
    }
    if let Some(after) = &outcome.paused_after {
        println!("paused after {after}; next: {}", join_or_end(&outcome.next));
    } else if outcome.finished {
        println!("finished");
        if let Some(state) = &outcome.state {
            println!("\n{}", state.draft);
        }
    }
    Ok(())
}

fn print_value(value: &Value) {
    match value {
        Value::String(s) => println!("{s}"),
        other => println!("{other}"),
    }
}

fn print_state(view: &StateView) -> Result<()> {
    let values = serde_json::to_string_pretty(&view.values.values()).into_diagnostic()?;
    println!("{values}");
    println!("step: {} ({})", view.step, view.source);
    println!("writer: {}", view.writer.as_deref().unwrap_or("-"));
    println!("next: {}", join_or_end(&view.next));
    println!("checkpoint: {}", view.checkpoint_id);
    Ok(())
}

fn print_history_entry(entry: &HistoryEntry) {
    println!(
        "{:>3}  {:<18} next={:<18} rev={} count={} {} {}",
        entry.step,
        entry.node,
        join_or_end(&entry.next),
        entry.revision_number,
        entry.count,
        entry.source,
        entry.checkpoint_id
    );
}

fn print_essay(essay: &EssayRecord) {
    println!(
        "{:>4}  {:<11} rev={} words={:<5} {}  {}  {}",
        essay.id,
        essay.status.as_str(),
        essay.revision_number,
        essay.word_count,
        essay.updated_at.format("%Y-%m-%d %H:%M"),
        essay.session_id.as_deref().unwrap_or("-"),
        essay.title
    );
}

/// Header lines plus the final essay, or the latest draft (or plan) while
/// the essay is still being written.
fn essay_detail(essay: &EssayRecord) -> String {
    let mut out = format!("essay {}: {}\n", essay.id, essay.title);
    out.push_str(&format!("status: {}\n", essay.status));
    out.push_str(&format!(
        "session: {}\n",
        essay.session_id.as_deref().unwrap_or("-")
    ));
    out.push_str(&format!(
        "revision: {}  words: {}\n",
        essay.revision_number, essay.word_count
    ));
    out.push_str(&format!(
        "created: {}  updated: {}\n",
        essay.created_at.format("%Y-%m-%d %H:%M"),
        essay.updated_at.format("%Y-%m-%d %H:%M")
    ));
    if let Some(done) = essay.completed_at {
        out.push_str(&format!("completed: {}\n", done.format("%Y-%m-%d %H:%M")));
    }
    let body = match &essay.final_essay {
        Some(text) => text.as_str(),
        None if !essay.draft.is_empty() => essay.draft.as_str(),
        None => essay.plan.as_str(),
    };
    if !body.is_empty() {
        out.push('\n');
        out.push_str(body);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use clap::CommandFactory;
    use serde_json::json;

    use crate::event_bus::MemorySink;
    use crate::store::EssayStatus;
    use crate::utils::testing::{ScriptedModel, StaticSearch};

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_start_with_pause_points() {
        let cli = Cli::try_parse_from([
            "essay-graph",
            "start",
            "--user",
            "3",
            "--topic",
            "tea",
            "--pause-after",
            "planner,reflect",
        ])
        .unwrap();
        match cli.command {
            Command::Start {
                user, pause_after, ..
            } => {
                assert_eq!(user, 3);
                assert_eq!(pause_after.unwrap(), vec!["planner", "reflect"]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn edit_requires_exactly_one_source() {
        assert!(
            Cli::try_parse_from(["essay-graph", "edit", "--session", "s", "--field", "plan"])
                .is_err()
        );
        assert!(
            Cli::try_parse_from([
                "essay-graph", "edit", "--session", "s", "--field", "plan", "--value", "x",
                "--file", "p.txt",
            ])
            .is_err()
        );
    }

    #[test]
    fn essays_sort_parses() {
        let cli =
            Cli::try_parse_from(["essay-graph", "essays", "--user", "1", "--sort", "created"])
                .unwrap();
        assert!(matches!(
            cli.command,
            Command::Essays {
                sort: EssaySort::Created,
                ..
            }
        ));
    }

    fn record(status: EssayStatus) -> EssayRecord {
        let at = chrono::Utc::now();
        EssayRecord {
            id: 4,
            user_id: 1,
            session_id: Some("essay-4".into()),
            title: "Essay: tea...".into(),
            topic: "tea".into(),
            plan: "I. Origins".into(),
            draft: "Draft two".into(),
            critique: String::new(),
            final_essay: None,
            status,
            revision_number: 2,
            word_count: 2,
            created_at: at,
            updated_at: at,
            completed_at: None,
        }
    }

    #[test]
    fn parses_essay_command() {
        let cli = Cli::try_parse_from(["essay-graph", "essay", "--user", "1", "--id", "4"]).unwrap();
        assert!(matches!(cli.command, Command::Essay { user: 1, id: 4 }));
    }

    #[test]
    fn essay_detail_shows_session_and_best_text() {
        let in_progress = essay_detail(&record(EssayStatus::InProgress));
        assert!(in_progress.contains("session: essay-4\n"));
        assert!(in_progress.contains("status: in_progress\n"));
        assert!(in_progress.ends_with("\nDraft two\n"));
        assert!(!in_progress.contains("completed:"));

        let mut done = record(EssayStatus::Completed);
        done.final_essay = Some("Final tea essay".into());
        done.completed_at = Some(done.updated_at);
        let rendered = essay_detail(&done);
        assert!(rendered.contains("completed: "));
        assert!(rendered.ends_with("\nFinal tea essay\n"));

        let mut fresh = record(EssayStatus::Draft);
        fresh.draft.clear();
        assert!(essay_detail(&fresh).ends_with("\nI. Origins\n"));
    }

    #[tokio::test]
    async fn max_revisions_key_reaches_new_sessions() {
        let config = AppConfig::from_lookup(|key| match key {
            "ESSAY_MAX_REVISIONS" => Some("1".to_string()),
            "ESSAY_CHECKPOINTER" => Some("memory".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(start_options(&config, Some(3), None).max_revisions, Some(3));

        let writer = EssayWriter::connect(
            Arc::new(ScriptedModel::repeating("unused")),
            Arc::new(StaticSearch::new()),
            &config.runtime_config(),
            EventBus::with_sink(MemorySink::new()),
        )
        .await
        .unwrap();
        let prefs = UserPreferences {
            default_max_revisions: 5,
            ..UserPreferences::defaults(1)
        };
        writer.save_preferences(&prefs).await.unwrap();

        let session = writer
            .create_session(Some(1), None, "tea", start_options(&config, None, None))
            .await
            .unwrap();
        let view = writer.get_state(&session).await.unwrap();
        assert_eq!(view.values.max_revisions, 1);
        writer.shutdown().await;
    }

    #[test]
    fn field_values_take_the_expected_shape() {
        assert_eq!(
            parse_field_value(StateField::Plan, "I. Intro").unwrap(),
            json!("I. Intro")
        );
        assert_eq!(
            parse_field_value(StateField::Queries, "[\"a\", \"b\"]").unwrap(),
            json!(["a", "b"])
        );
        assert_eq!(
            parse_field_value(StateField::Queries, "a\n\n b \n").unwrap(),
            json!(["a", "b"])
        );
        assert_eq!(
            parse_field_value(StateField::MaxRevisions, " 3 ").unwrap(),
            json!(3)
        );
        assert!(parse_field_value(StateField::RevisionNumber, "two").is_err());
    }
}
