use std::fs;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tessera::{BufferEditor, InsertOptions, Registry, SnippetEngine};

#[derive(Parser)]
#[command(name = "tessera-cli", about = "Tokenize files and expand snippets")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Tokenize a file with a JSON rule table and print one token per line
    Tokenize {
        /// Path to the rule table
        #[arg(long)]
        rules: PathBuf,
        file: PathBuf,
    },
    /// Expand a snippet into an empty buffer and print the text and its tabstops
    Expand {
        template: String,
        /// Only compute the expansion
        #[arg(long)]
        dry_run: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Tokenize { rules, file } => {
            let mut registry = Registry::new();
            registry.add_mode_from_path("cli", &rules)?;
            let content = fs::read_to_string(&file)?;
            let lines = registry.tokenize("cli", &content, false)?;
            for (row, line) in lines.iter().enumerate() {
                for token in &line.tokens {
                    println!("{row}: {} {:?}", token.kind, token.value);
                }
                println!("{row}: -> {:?}", line.state);
            }
        }
        Command::Expand { template, dry_run } => {
            let mut editor = BufferEditor::new("");
            let mut engine = SnippetEngine::new()?;
            let options = InsertOptions::default().dry_run(dry_run);
            let expanded = engine.insert_snippet(&mut editor, &template, &options);

            if dry_run {
                println!("{}", expanded.text);
            } else {
                println!("{}", editor.text());
            }
            println!("---");
            for group in &expanded.tabstops {
                let ranges: Vec<String> = group
                    .ranges
                    .iter()
                    .map(|r| {
                        format!(
                            "{}:{}-{}:{}",
                            r.start.row, r.start.column, r.end.row, r.end.column
                        )
                    })
                    .collect();
                println!("${} {}", group.id, ranges.join(" "));
            }
        }
    }

    Ok(())
}
