use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use project_tracker::config;
use project_tracker::db;
use project_tracker::error::LifecycleError;
use project_tracker::imaging;
use project_tracker::lifecycle::{ImageInput, ProjectDraft, ProjectService, SaveOutcome};
use project_tracker::models::{Project, ProjectId};

#[derive(Parser)]
#[command(name = "project-tracker", version, about = "Track projects, their images and links locally")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List active and submitted projects
    List,
    /// Show one project
    Show { id: ProjectId },
    /// Create a new project
    Create(CreateArgs),
    /// Edit an active project
    Edit(EditArgs),
    /// Submit a project; it can no longer be edited afterwards
    Submit {
        id: ProjectId,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Delete a project
    Delete {
        id: ProjectId,
        #[arg(long)]
        yes: bool,
    },
    /// Ongoing, submitted and due-soon counters
    Stats,
    /// Print a project, images included, as JSON
    Export { id: ProjectId },
}

#[derive(Args)]
struct CreateArgs {
    #[arg(long)]
    title: String,
    #[arg(long, default_value = "")]
    description: String,
    /// Due date as YYYY-MM-DD
    #[arg(long)]
    due_date: Option<String>,
    /// What did you learn?
    #[arg(long, default_value = "")]
    question1: String,
    /// What surprised you?
    #[arg(long, default_value = "")]
    question2: String,
    #[arg(long)]
    banner: Option<PathBuf>,
    /// Gallery image; repeat for more (at most 10)
    #[arg(long = "file")]
    files: Vec<PathBuf>,
    #[arg(long = "link")]
    links: Vec<String>,
}

#[derive(Args)]
struct EditArgs {
    id: ProjectId,
    #[arg(long)]
    title: Option<String>,
    #[arg(long)]
    description: Option<String>,
    /// New due date; pass an empty string to clear it
    #[arg(long)]
    due_date: Option<String>,
    #[arg(long)]
    question1: Option<String>,
    #[arg(long)]
    question2: Option<String>,
    /// Replace the banner
    #[arg(long)]
    banner: Option<PathBuf>,
    /// Drop the banner
    #[arg(long, conflicts_with = "banner")]
    remove_banner: bool,
    /// Remove a gallery image by its 1-based position; repeatable
    #[arg(long = "remove-file")]
    remove_files: Vec<usize>,
    /// Append a gallery image; repeatable
    #[arg(long = "add-file")]
    add_files: Vec<PathBuf>,
    /// Drop every existing link before adding new ones
    #[arg(long)]
    clear_links: bool,
    #[arg(long = "add-link")]
    add_links: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    // Load configuration
    let config = config::init()?;

    // Open the project store
    let db = db::init(&config)
        .await
        .context("The project store could not be opened")?;
    let service = ProjectService::new(db, config.normalize_options());

    let result = run(&service, cli.command).await;
    service.db().close().await;

    match result {
        Err(err) if is_not_found(&err) => {
            println!("Project not found");
            Ok(())
        }
        other => other,
    }
}

async fn run(service: &ProjectService, command: Command) -> Result<()> {
    match command {
        Command::List => list_projects(service).await,
        Command::Show { id } => show_project(service, id).await,
        Command::Create(args) => create_project(service, args).await,
        Command::Edit(args) => edit_project(service, args).await,
        Command::Submit { id, yes } => {
            let project = service.view_project(id).await?;
            if project.is_submitted() {
                println!("Project {} was already submitted", id);
                return Ok(());
            }
            let prompt = "Are you sure you want to submit this project? \
                          You won't be able to edit it after submission.";
            if yes || confirm(prompt)? {
                service.submit_project(id).await?;
                println!("Submitted project {}", id);
            }
            Ok(())
        }
        Command::Delete { id, yes } => {
            if yes || confirm("Are you sure you want to delete this project?")? {
                service.delete_project(id).await?;
                println!("Deleted project {}", id);
            }
            Ok(())
        }
        Command::Stats => show_stats(service).await,
        Command::Export { id } => {
            let project = service.view_project(id).await?;
            println!("{}", serde_json::to_string_pretty(&project)?);
            Ok(())
        }
    }
}

async fn list_projects(service: &ProjectService) -> Result<()> {
    let dashboard = service.dashboard(chrono::Local::now().date_naive()).await?;

    println!("Projects ({})", dashboard.active.len());
    for project in &dashboard.active {
        print_summary(project);
    }

    println!();
    println!("Submitted ({})", dashboard.submitted.len());
    for project in &dashboard.submitted {
        print_summary(project);
    }

    Ok(())
}

fn print_summary(project: &Project) {
    let due = project
        .due_date
        .as_deref()
        .map(|date| format!("  due {}", date))
        .unwrap_or_default();
    println!("  #{:<4} {}{}", project.id, project.title, due);
    if !project.description.is_empty() {
        println!("        {}", project.description);
    }
}

async fn show_project(service: &ProjectService, id: ProjectId) -> Result<()> {
    let project = service.view_project(id).await?;

    println!("{} (#{}, {})", project.title, project.id, project.status);
    println!("{}", project.description);
    println!("Due date: {}", project.due_date.as_deref().unwrap_or("N/A"));
    println!("Created: {}", project.created_at.format("%Y-%m-%d %H:%M"));
    println!("What did you learn? {}", or_na(&project.question1));
    println!("What surprised you? {}", or_na(&project.question2));

    if project.has_banner() {
        match imaging::data_uri_dimensions(&project.banner) {
            Ok((width, height)) => println!("Banner: {}x{}", width, height),
            Err(err) => println!("Banner: unreadable ({})", err),
        }
    } else {
        println!("Banner: none");
    }

    println!("Gallery: {} image(s)", project.files.len());
    for (position, file) in project.files.iter().enumerate() {
        println!(
            "  {}. {:.2}MB",
            position + 1,
            imaging::estimated_size_mb(file)
        );
    }

    println!("Links:");
    for link in &project.links {
        println!("  {}", link);
    }

    Ok(())
}

fn or_na(value: &str) -> &str {
    if value.is_empty() { "N/A" } else { value }
}

async fn create_project(service: &ProjectService, args: CreateArgs) -> Result<()> {
    let mut draft = ProjectDraft::new(args.title);
    draft.description = args.description;
    draft.due_date = args.due_date;
    draft.question1 = args.question1;
    draft.question2 = args.question2;

    if let Some(path) = args.banner {
        draft.banner = Some(read_image(&path).await?);
    }
    draft.pick_files(read_files(&args.files).await?)?;
    for link in &args.links {
        draft.add_link(link);
    }

    let outcome = service
        .create_project(draft)
        .await
        .context("An error occurred while creating the project")?;
    report(&outcome, "Created");

    Ok(())
}

async fn edit_project(service: &ProjectService, args: EditArgs) -> Result<()> {
    let mut session = match service.open_for_edit(args.id).await {
        Err(LifecycleError::AlreadySubmitted(id)) => {
            println!("Project {} has been submitted and can no longer be edited", id);
            return Ok(());
        }
        other => other?,
    };
    let draft = &mut session.draft;

    if let Some(title) = args.title {
        draft.title = title;
    }
    if let Some(description) = args.description {
        draft.description = description;
    }
    if let Some(due_date) = args.due_date {
        draft.due_date = Some(due_date);
    }
    if let Some(question1) = args.question1 {
        draft.question1 = question1;
    }
    if let Some(question2) = args.question2 {
        draft.question2 = question2;
    }

    if args.remove_banner {
        draft.banner = None;
    } else if let Some(path) = args.banner {
        draft.banner = Some(read_image(&path).await?);
    }

    // Remove from the back so earlier positions stay valid
    let mut remove = args.remove_files;
    remove.sort_unstable();
    remove.dedup();
    for position in remove.into_iter().rev() {
        if position == 0 || position > draft.gallery.len() {
            anyhow::bail!("There is no gallery image at position {}", position);
        }
        draft.gallery.remove(position - 1);
    }
    draft.pick_files(read_files(&args.add_files).await?)?;

    if args.clear_links {
        draft.links.clear();
    }
    for link in &args.add_links {
        draft.add_link(link);
    }

    let outcome = service
        .save_edit(session)
        .await
        .context("Error saving changes")?;
    report(&outcome, "Updated");

    Ok(())
}

async fn show_stats(service: &ProjectService) -> Result<()> {
    let stats = service
        .dashboard(chrono::Local::now().date_naive())
        .await?
        .stats;

    println!(
        "On-going:      {} ({:.1}%)",
        stats.ongoing,
        stats.share(stats.ongoing)
    );
    println!(
        "Submitted:     {} ({:.1}%)",
        stats.submitted,
        stats.share(stats.submitted)
    );
    println!("Due this week: {}", stats.due_soon);
    println!("Not due soon:  {}", stats.not_due_soon);

    Ok(())
}

fn report(outcome: &SaveOutcome, verb: &str) {
    println!("{} project {}", verb, outcome.id);
    if let Some(warnings) = &outcome.warnings {
        eprintln!("Warning: {}", warnings);
    }
}

async fn read_image(path: &Path) -> Result<ImageInput> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Could not read {}", path.display()))?;
    Ok(ImageInput::picked(file_name(path), bytes))
}

async fn read_files(paths: &[PathBuf]) -> Result<Vec<(String, Vec<u8>)>> {
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Could not read {}", path.display()))?;
        files.push((file_name(path), bytes));
    }
    Ok(files)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{} [y/N] ", prompt);
    io::stdout().flush()?;

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes" | "Yes"))
}

fn is_not_found(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<LifecycleError>()
            .is_some_and(LifecycleError::is_not_found)
    })
}
