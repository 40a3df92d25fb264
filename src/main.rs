//! # Courseloom CLI (`crs`)
//!
//! The `crs` binary is the thin collaborator over the course engine. It
//! exposes the catalog queries, progress commands, and recommendation reads
//! that an MCP tool layer would call, as plain subcommands.
//!
//! ## Usage
//!
//! ```bash
//! crs --config ./config/crs.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `crs init` | Create the progress database schema |
//! | `crs sources` | List configured sources and their status |
//! | `crs rebuild` | Force a catalog rebuild, bypassing the cache |
//! | `crs courses` | List courses in the merged catalog |
//! | `crs outline <course>` | Show a course's module structure |
//! | `crs module <course> <module>` | Show one module with its steps |
//! | `crs step <course> <module> <step>` | Print one step's content |
//! | `crs search "<query>"` | Search step content |
//! | `crs start <user> <course>` | Enroll a learner in a course |
//! | `crs progress <user>` | Show a learner's progress record |
//! | `crs complete <user> <step-id>` | Mark a step completed |
//! | `crs assess <user> <module>` | Record a graded assessment |
//! | `crs advance <user>` | Move the learner to the next step |
//! | `crs recommend <user>` | Weak areas, completion, and next step |

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use courseloom::config::load_config;
use courseloom::engine::CourseEngine;
use courseloom::models::{NextPosition, SourceKind, StepType};
use courseloom::recommend::Completion;

/// Courseloom — a multi-source course aggregation, caching, and
/// learner-progress engine for AI tutoring tools.
#[derive(Parser)]
#[command(
    name = "crs",
    about = "Courseloom — multi-source course aggregation and learner progress",
    version,
    long_about = "Courseloom normalizes course trees from local directories and remote git \
    repositories into one canonical catalog, caches it by source fingerprint, and keeps \
    durable per-learner progress and assessment state."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/crs.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the progress database schema. Idempotent.
    Init,

    /// List configured sources and their status.
    ///
    /// Local sources are checked for existence; remote sources are not
    /// contacted here (rebuild is the operation that fetches).
    Sources,

    /// Force a full catalog rebuild, bypassing the persisted cache.
    ///
    /// Prints a build report: course count plus every diagnostic recorded
    /// during resolution, normalization, and merge.
    Rebuild,

    /// List courses in the merged catalog.
    Courses {
        /// Filter by level (beginner, intermediate, advanced).
        #[arg(long)]
        level: Option<String>,

        /// Filter by source kind (local, remote).
        #[arg(long)]
        kind: Option<String>,
    },

    /// Show a course's module structure.
    Outline {
        /// Course key, e.g. `beginner/Intro`.
        course: String,
    },

    /// Show one module with its five steps.
    Module {
        course: String,
        module: String,
    },

    /// Print one step's content.
    Step {
        course: String,
        module: String,
        /// One of: intro, main, conclusion, assessment, summary.
        step: String,
    },

    /// Search step content across the catalog.
    Search {
        query: String,

        /// Restrict to one level.
        #[arg(long)]
        level: Option<String>,
    },

    /// Enroll a learner in a course, positioning them at its first step.
    Start {
        user: String,
        course: String,
    },

    /// Show a learner's progress record.
    Progress {
        user: String,
    },

    /// Mark a step completed. Idempotent.
    Complete {
        user: String,
        /// Step id: `{course}/{module}/{step}`, e.g. `beginner/Intro/m1/intro`.
        step_id: String,
    },

    /// Record a graded assessment submission for a module.
    Assess {
        user: String,
        module: String,

        /// Score in [0.0, 1.0].
        #[arg(long)]
        score: f64,

        /// Raw answers as a JSON document.
        #[arg(long, default_value = "{}")]
        answers: String,

        /// Optional one-line feedback summary.
        #[arg(long)]
        feedback: Option<String>,
    },

    /// Move the learner to the next step of their current course.
    Advance {
        user: String,
    },

    /// Weak areas, completion percentage, and suggested next step.
    Recommend {
        user: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    let engine = CourseEngine::open(config).await?;

    match cli.command {
        Commands::Init => {
            // Opening the engine created the schema already
            println!("progress database initialized");
            println!("ok");
        }

        Commands::Sources => {
            println!("{:<16} {:<8} {:<40} STATUS", "SOURCE", "KIND", "LOCATOR");
            for s in engine.source_status() {
                println!("{:<16} {:<8} {:<40} {}", s.name, s.kind.to_string(), s.locator, s.status);
            }
        }

        Commands::Rebuild => {
            let snapshot = engine.rebuild().await?;
            println!("rebuild");
            println!("  fingerprint: {}", snapshot.fingerprint);
            println!("  courses: {}", snapshot.courses.len());
            println!("  diagnostics: {}", snapshot.diagnostics.len());
            for d in &snapshot.diagnostics {
                println!("  [{}] {} ({}): {}", d.scope, d.subject, d.source, d.message);
            }
            println!("ok");
        }

        Commands::Courses { level, kind } => {
            let kind = match kind.as_deref() {
                None => None,
                Some(s) => Some(
                    SourceKind::parse(s)
                        .ok_or_else(|| anyhow::anyhow!("unknown kind '{}'; use local or remote", s))?,
                ),
            };
            let courses = engine.list_courses(level.as_deref(), kind).await?;
            if courses.is_empty() {
                println!("No courses.");
            } else {
                println!(
                    "{:<36} {:<14} {:<8} {:<12} MODULES",
                    "COURSE", "LEVEL", "KIND", "SOURCE"
                );
                for c in courses {
                    println!(
                        "{:<36} {:<14} {:<8} {:<12} {}",
                        c.course_key,
                        c.level,
                        c.kind.to_string(),
                        c.source_name,
                        c.modules
                    );
                }
            }
        }

        Commands::Outline { course } => {
            let outline = engine.course_outline(&course).await?;
            println!("--- Course ---");
            println!("key:         {}", outline.course_key);
            println!("title:       {}", outline.title);
            println!("level:       {}", outline.level);
            println!("description: {}", outline.description);
            println!("source:      {}", outline.provenance.source_name);
            if let Some(ref duration) = outline.estimated_duration {
                println!("duration:    {}", duration);
            }
            println!();
            println!("--- Modules ({}) ---", outline.modules.len());
            for m in &outline.modules {
                let minutes = m
                    .estimated_minutes
                    .map(|m| format!("~{} min", m))
                    .unwrap_or_default();
                println!("{:<16} {:<40} {}", m.module_id, m.title, minutes);
            }
        }

        Commands::Module { course, module } => {
            let content = engine.module_content(&course, &module).await?;
            println!("--- Module {} ---", content.module_id);
            println!("title: {}", content.title);
            println!();
            for step in &content.steps {
                println!(
                    "{:<12} {:<40} {} words  ({})",
                    step.step_type.to_string(),
                    step.title,
                    step.word_count,
                    step.source_file
                );
            }
        }

        Commands::Step {
            course,
            module,
            step,
        } => {
            let step_type = StepType::parse(&step).ok_or_else(|| {
                anyhow::anyhow!(
                    "unknown step type '{}'; use intro, main, conclusion, assessment, or summary",
                    step
                )
            })?;
            let content = engine.step_content(&course, &module, step_type).await?;
            println!("--- {} / {} / {} ---", course, module, content.step_type);
            println!("title: {}", content.title);
            println!("words: {}", content.word_count);
            println!();
            println!("{}", content.body);
        }

        Commands::Search { query, level } => {
            let hits = engine.search(&query, level.as_deref()).await?;
            if hits.is_empty() {
                println!("No results.");
            } else {
                for hit in hits {
                    println!("{}/{}/{}", hit.course_key, hit.module_id, hit.step_type);
                    println!("  {}", hit.snippet);
                }
            }
        }

        Commands::Start { user, course } => {
            let progress = engine.start_course(&user, &course).await?;
            println!("started {} on {}", progress.user_id, course);
            print_position(&progress.current_module_id, progress.current_step_type);
        }

        Commands::Progress { user } => {
            let progress = engine.get_progress(&user).await?;
            println!("--- Progress for {} ---", progress.user_id);
            println!(
                "course:        {}",
                progress.current_course_key.as_deref().unwrap_or("(none)")
            );
            print_position(&progress.current_module_id, progress.current_step_type);
            println!("completed:     {} steps", progress.completed_steps.len());
            println!("started_at:    {}", progress.started_at.to_rfc3339());
            println!("last_activity: {}", progress.last_activity_at.to_rfc3339());
            if !progress.assessment_scores.is_empty() {
                println!();
                println!("--- Scores ---");
                for (module, score) in &progress.assessment_scores {
                    println!("{:<20} {:.2}", module, score);
                }
            }
            let history = engine.assessment_history(&user, None).await?;
            if !history.is_empty() {
                println!();
                println!("--- Assessment history ({}) ---", history.len());
                for record in history {
                    println!(
                        "{}  {:<20} {:.2}",
                        record.graded_at.to_rfc3339(),
                        record.module_id,
                        record.score
                    );
                }
            }
        }

        Commands::Complete { user, step_id } => {
            let progress = engine.complete_step(&user, &step_id).await?;
            println!("completed {}", step_id);
            println!("total completed: {}", progress.completed_steps.len());
        }

        Commands::Assess {
            user,
            module,
            score,
            answers,
            feedback,
        } => {
            let raw_answers: serde_json::Value = serde_json::from_str(&answers)
                .map_err(|e| anyhow::anyhow!("--answers is not valid JSON: {}", e))?;
            let record = engine
                .submit_assessment(&user, &module, raw_answers, score, feedback)
                .await?;
            println!("assessment recorded");
            println!("  id:     {}", record.id);
            println!("  module: {}", record.module_id);
            println!("  score:  {:.2}", record.score);
        }

        Commands::Advance { user } => match engine.advance(&user).await? {
            NextPosition::Step {
                module_id,
                step_type,
            } => println!("next: {} / {}", module_id, step_type),
            NextPosition::Complete => println!("course complete"),
        },

        Commands::Recommend { user } => {
            let rec = engine.recommendations(&user).await?;
            match rec.completion {
                Some(Completion::Ratio(ratio)) => {
                    println!("completion: {:.0}%", ratio * 100.0)
                }
                Some(Completion::UnknownCourse) => {
                    println!("completion: unknown (course no longer in catalog)")
                }
                None => println!("completion: not enrolled"),
            }
            match rec.next {
                Some((module, step)) => println!("next step:  {} / {}", module, step),
                None => println!("next step:  (none)"),
            }
            if rec.weak_areas.is_empty() {
                println!("weak areas: none");
            } else {
                println!("weak areas:");
                for (module, score) in rec.weak_areas {
                    println!("  {:<20} {:.2}", module, score);
                }
            }
        }
    }

    Ok(())
}

fn print_position(module_id: &Option<String>, step_type: Option<StepType>) {
    match (module_id, step_type) {
        (Some(module), Some(step)) => println!("position:      {} / {}", module, step),
        _ => println!("position:      (none)"),
    }
}
