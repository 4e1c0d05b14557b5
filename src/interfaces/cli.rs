//! `sqlwarden` command line.
//!
//! Usage:
//!   sqlwarden ask --role Teller "Show me all transactions"
//!   sqlwarden repl --role Manager
//!   sqlwarden inspect --role Teller
//!   sqlwarden roles

use crate::application::use_cases::embedding_service::{Embedder, EmbeddingService};
use crate::application::{QueryAnswer, QueryPipeline};
use crate::domain::error::{AppError, Result};
use crate::domain::llm_config::EmbeddingProvider;
use crate::domain::query_result::{display_value, QueryResult};
use crate::domain::session::SessionContext;
use crate::infrastructure::config::{AppConfig, ConfigService};
use crate::infrastructure::db;
use crate::infrastructure::llm_clients::{LLMClient, RouterClient};
use crate::infrastructure::policy_store::{load_dictionary, load_policy};
use clap::{Parser, Subcommand};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::error;

/// Rows printed per answer; the summary still reports the full count.
const MAX_PRINTED_ROWS: usize = 50;

#[derive(Parser)]
#[command(name = "sqlwarden")]
#[command(about = "Answer questions over a relational database within a role's access")]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Answer a single question
    Ask {
        #[arg(short, long)]
        role: String,
        question: String,
    },
    /// Interactive session; follow-up questions can refer to earlier answers
    Repl {
        #[arg(short, long)]
        role: String,
    },
    /// Show the tables and columns a role may query
    Inspect {
        #[arg(short, long)]
        role: String,
    },
    /// List the roles defined by the access policy
    Roles,
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(execute(cli)) {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("{}", e.user_message());
            ExitCode::FAILURE
        }
    }
}

async fn execute(cli: Cli) -> Result<ExitCode> {
    let mut config = AppConfig::load(cli.config.as_deref())?;

    if let Command::Roles = cli.command {
        for role in load_policy(&config.policy_path)?.roles() {
            println!("{}", role);
        }
        return Ok(ExitCode::SUCCESS);
    }

    let pipeline = build_pipeline(&mut config).await?;
    match cli.command {
        Command::Ask { role, question } => {
            let mut session = pipeline.open_session(&role)?;
            match pipeline.answer(&mut session, &question).await {
                Ok(answer) => {
                    print_answer(&answer);
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => {
                    println!("{}", e.user_message());
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Command::Repl { role } => {
            let mut session = pipeline.open_session(&role)?;
            repl(&pipeline, &mut session).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Inspect { role } => {
            inspect(&pipeline, &role)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Roles => Ok(ExitCode::SUCCESS),
    }
}

async fn build_pipeline(config: &mut AppConfig) -> Result<QueryPipeline> {
    let secrets = ConfigService::new();
    secrets.resolve_api_keys(config)?;
    let password = secrets.database_password(&config.database)?;

    let engine = db::connect(&config.database, password.as_deref()).await?;
    let policy = load_policy(&config.policy_path)?;
    let dictionary = match &config.dictionary_path {
        Some(path) => load_dictionary(path)?,
        None => Vec::new(),
    };

    let llm_client: Arc<dyn LLMClient> = Arc::new(RouterClient::new());
    let embedder: Option<Arc<dyn Embedder>> = match config.embedding.provider {
        EmbeddingProvider::Disabled => None,
        _ => Some(Arc::new(EmbeddingService::new(config.embedding.clone()))),
    };

    QueryPipeline::bootstrap(config, engine, policy, &dictionary, llm_client, embedder).await
}

async fn repl(pipeline: &QueryPipeline, session: &mut SessionContext) -> Result<()> {
    println!(
        "Connected as {}. Type a question, :history, :clear or :quit.",
        session.role
    );
    let stdin = std::io::stdin();
    let mut line = String::new();
    loop {
        print!("{}> ", session.role);
        std::io::stdout().flush()?;

        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        match line.trim() {
            "" => continue,
            ":quit" | ":q" => break,
            ":clear" => {
                session.clear_history();
                println!("History cleared.");
            }
            ":history" => {
                for (i, turn) in session.history().iter().enumerate() {
                    let sql = turn
                        .candidate
                        .as_ref()
                        .map(|c| c.statement.as_str())
                        .unwrap_or("-");
                    println!("{}. {}\n   {}\n   {}", i + 1, turn.question, sql, turn.response);
                }
            }
            question => match pipeline.answer(session, question).await {
                Ok(answer) => print_answer(&answer),
                Err(e) => println!("{}", e.user_message()),
            },
        }
    }
    Ok(())
}

fn inspect(pipeline: &QueryPipeline, role: &str) -> Result<()> {
    let scope = pipeline.scope(role)?;
    if scope.is_empty() {
        return Err(AppError::ConfigError(format!(
            "Role '{}' has no accessible tables",
            role
        )));
    }
    println!("Role: {}", scope.role());
    for table in scope.tables() {
        let columns = scope.visible_columns(table, pipeline.catalog());
        println!("  {}: {}", table, columns.join(", "));
    }
    Ok(())
}

fn print_answer(answer: &QueryAnswer) {
    println!("SQL: {}", answer.statement);
    if let Some(note) = &answer.correction {
        println!("Note: {}", note);
    }
    println!("{}", answer.response);
    if !answer.result.is_empty() {
        print!("{}", render_table(&answer.result, MAX_PRINTED_ROWS));
    }
}

/// Tab-separated header and rows, truncated to `limit` rows.
fn render_table(result: &QueryResult, limit: usize) -> String {
    let mut out = format!("{}\n", result.columns.join("\t"));
    for row in result.rows.iter().take(limit) {
        let cells: Vec<String> = row.iter().map(display_value).collect();
        out.push_str(&cells.join("\t"));
        out.push('\n');
    }
    if result.row_count() > limit {
        out.push_str(&format!("... {} more row(s)\n", result.row_count() - limit));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_ask() {
        let cli = Cli::try_parse_from([
            "sqlwarden",
            "--config",
            "bank.toml",
            "ask",
            "--role",
            "Teller",
            "Show me all transactions",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("bank.toml")));
        match cli.command {
            Command::Ask { role, question } => {
                assert_eq!(role, "Teller");
                assert_eq!(question, "Show me all transactions");
            }
            _ => panic!("expected ask"),
        }
    }

    #[test]
    fn test_render_table_truncates() {
        let result = QueryResult::new(
            vec!["txn_id".to_string(), "amount".to_string()],
            vec![
                vec![json!(100), json!(250.0)],
                vec![json!(101), serde_json::Value::Null],
                vec![json!(102), json!(12.5)],
            ],
        );
        assert_eq!(
            render_table(&result, 2),
            "txn_id\tamount\n100\t250.0\n101\tNULL\n... 1 more row(s)\n"
        );
    }
}
