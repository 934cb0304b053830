use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use gymface_core::{CheckinOutcome, CheckinService, Config, FacePipeline, MemberId, Probe};
use gymface_store::{NewMember, SqliteStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "gymface", version, about = "gymface face check-in administration")]
struct Cli {
    /// Database path (overrides GYMFACE_DB_PATH and the config file)
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage members
    Member {
        #[command(subcommand)]
        command: MemberCommand,
    },
    /// Enroll a member's face from an image file
    Enroll {
        /// Member id
        #[arg(short, long)]
        member: i64,
        /// Image containing the member's face
        image: PathBuf,
    },
    /// Recognize the face in an image file and record a check-in
    Recognize {
        image: PathBuf,
        /// Match only; do not write an attendance event
        #[arg(long)]
        dry_run: bool,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show enrolled members and gallery health
    Gallery,
}

#[derive(Subcommand)]
enum MemberCommand {
    /// Register a new member
    Add {
        first_name: String,
        #[arg(default_value = "")]
        last_name: String,
        #[arg(long)]
        email: Option<String>,
    },
    /// List all members
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = Config::load().context("failed to load configuration")?;
    if let Some(db) = cli.db {
        config.db_path = db;
    }
    tracing::debug!(
        db_path = %config.db_path.display(),
        model_dir = %config.model_dir.display(),
        "configuration loaded"
    );

    let store = Arc::new(
        SqliteStore::open(&config.db_path)
            .await
            .with_context(|| format!("failed to open database at {}", config.db_path.display()))?,
    );

    match cli.command {
        Commands::Member { command } => match command {
            MemberCommand::Add {
                first_name,
                last_name,
                email,
            } => {
                let member = store
                    .add_member(NewMember {
                        first_name,
                        last_name,
                        email,
                    })
                    .await?;
                println!("Added member {} ({})", member.id, member.display_name());
            }
            MemberCommand::List => {
                let members = store.list_members().await?;
                if members.is_empty() {
                    println!("No members");
                }
                for row in members {
                    let last_visit = row
                        .member
                        .last_visit
                        .map_or_else(|| "never".to_string(), |d| d.to_string());
                    let face = if row.embedding_dimension > 0 {
                        format!("enrolled ({}-d)", row.embedding_dimension)
                    } else {
                        "not enrolled".to_string()
                    };
                    println!(
                        "{:>5}  {:<30}  last visit: {:<10}  {}",
                        row.member.id.0,
                        row.member.display_name(),
                        last_visit,
                        face
                    );
                }
            }
        },
        Commands::Enroll { member, image } => {
            let (mut pipeline, service) = load_pipeline(&config, store).await?;
            let bytes = read_image(&image)?;
            let Probe::Face { face, embedding } = pipeline.probe(&bytes)? else {
                bail!("no face detected in {}", image.display());
            };
            tracing::debug!(member, confidence = face.confidence, "face embedded for enrollment");
            let (member, report) = service.enroll(MemberId(member), &embedding).await?;
            println!(
                "Enrolled {} (detection confidence {:.2}); gallery now has {} members",
                member.display_name(),
                face.confidence,
                report.members
            );
        }
        Commands::Recognize {
            image,
            dry_run,
            json,
        } => {
            let (mut pipeline, service) = load_pipeline(&config, store).await?;
            let bytes = read_image(&image)?;
            let embedding = match pipeline.probe(&bytes)? {
                Probe::NoFace => {
                    println!("No faces detected");
                    return Ok(());
                }
                Probe::Face { face, embedding } => {
                    tracing::debug!(confidence = face.confidence, "face embedded");
                    embedding
                }
            };

            if dry_run {
                let decision = service.match_probe(&embedding)?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&decision)?);
                } else if let (true, Some(id)) = (decision.matched, decision.member_id) {
                    println!(
                        "Matched member {id} (distance {:.4}, confidence {:.2})",
                        decision.distance, decision.confidence
                    );
                } else {
                    println!("Face not recognized (nearest distance {:.4})", decision.distance);
                }
                return Ok(());
            }

            match service.check_in(&embedding).await? {
                CheckinOutcome::NotRecognized { decision } => {
                    println!("Face not recognized (nearest distance {:.4})", decision.distance);
                }
                CheckinOutcome::AlreadyRecorded {
                    member,
                    last_event_at,
                    ..
                } => {
                    println!(
                        "Already updated for {} (last event {})",
                        member.display_name(),
                        last_event_at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S")
                    );
                }
                CheckinOutcome::CheckedIn { member, event, .. } => {
                    if json {
                        println!("{}", serde_json::to_string_pretty(&event)?);
                    } else {
                        println!(
                            "Welcome back, {}! (event {}, confidence {:.2})",
                            member.first_name, event.id, event.confidence
                        );
                    }
                }
            }
        }
        Commands::Gallery => {
            let service = CheckinService::new(
                store.clone(),
                // Models are not loaded here; assume the ArcFace width.
                gymface_core::recognizer::ARCFACE_DIMENSION,
                config.distance_metric,
                config.match_threshold,
                config.recorder(),
            )
            .await?;
            let snapshot = service.gallery();
            println!(
                "{} enrolled members ({}-d, {} distance, threshold {})",
                snapshot.len(),
                snapshot.dimension(),
                service.metric(),
                service.threshold()
            );
            for row in store.list_members().await? {
                if snapshot.contains(row.member.id) {
                    println!("{:>5}  {}", row.member.id.0, row.member.display_name());
                } else if row.embedding_dimension > 0 {
                    println!(
                        "{:>5}  {}  (excluded: {}-d embedding)",
                        row.member.id.0,
                        row.member.display_name(),
                        row.embedding_dimension
                    );
                }
            }
        }
    }

    Ok(())
}

fn read_image(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))
}

async fn load_pipeline(
    config: &Config,
    store: Arc<SqliteStore>,
) -> Result<(FacePipeline, CheckinService<SqliteStore>)> {
    let pipeline = FacePipeline::load(&config.detector_model_path(), &config.recognizer_model_path())
        .context("failed to load face models")?;
    let (detector, extractor) = pipeline.backends();
    tracing::info!(detector, extractor, dimension = pipeline.dimension(), "face models loaded");
    let service = CheckinService::new(
        store,
        pipeline.dimension(),
        config.distance_metric,
        config.match_threshold,
        config.recorder(),
    )
    .await?;
    Ok((pipeline, service))
}
