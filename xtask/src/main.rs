//! Build automation tasks for Sluice
//!
//! Currently generates the CLI reference from the clap definitions.

use clap::Parser;
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Build automation tasks for Sluice", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Parser)]
enum Command {
    /// Generate the CLI reference in markdown
    GenerateCliDocs {
        /// Output directory for generated documentation
        #[arg(short, long, default_value = "docs")]
        output_dir: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::GenerateCliDocs { output_dir } => generate_cli_docs(&output_dir)?,
    }

    Ok(())
}

fn generate_cli_docs(output_dir: &str) -> anyhow::Result<()> {
    println!("Generating CLI documentation...");

    let markdown = clap_markdown::help_markdown::<sluice_cli::Cli>();

    let content = format!(
        r#"# Sluice CLI Reference

Generated from the CLI source code on {}.

## Commands

{}

## Job Properties

`sluice run` and `sluice plan` read a job properties file of `key=value`
lines. `#` and `!` start comments. Per-branch keys take a `.N` suffix and
fall back to the unsuffixed key.

```properties
job-name=wiki
source-type=jsonl
source-file-list=data/part-0.jsonl,data/part-1.jsonl
max-concurrent-slots=4
use-multi-work-unit=true
fork-branches=2
converter-classes=flatten,drop-nulls
row-level-policy-list.1=required-field:id
row-level-policy-list-type.1=MANDATORY
writer-output-format.1=csv
writer-staging-dir=work/staging
writer-output-dir=work/output
data-publisher-final-dir=published
```

## Environment Variables

- `SLUICE_STATE_STORE_DIR` - Watermark directory (default: `./state`)
- `SLUICE_JOB_HISTORY_URL` - SQLite URL for job history (default: in memory)
- `SLUICE_CHANNEL_CAPACITY` - Records buffered per fork branch (default: `256`)
- `LOG_LEVEL`, `LOG_OUTPUT`, `LOG_FORMAT`, `LOG_DIR`, `LOG_FILTER` - Logging

---

*To update, run `cargo xtask generate-cli-docs`.*
"#,
        chrono::Utc::now().format("%Y-%m-%d"),
        markdown
    );

    let output_path = PathBuf::from(output_dir);
    fs::create_dir_all(&output_path)?;

    let file_path = output_path.join("cli-reference.md");
    fs::write(&file_path, content)?;

    println!("Generated CLI documentation at: {}", file_path.display());

    Ok(())
}
