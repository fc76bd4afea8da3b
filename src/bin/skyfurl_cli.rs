use clap::{Args, Parser, Subcommand};
use skyfurl::{
    build_http_client,
    config::{hours_to_duration, Config},
    errors::AppError,
    manifest::Manifest,
    server::{connect_bluesky, open_installation_store},
    unfurl_builder::UnfurlBuilder,
    video_processor::VideoProcessor,
};
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "Skyfurl operator tools", long_about = None)]
struct App {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Prints the unfurl Slack would receive for a link.
    Preview(PreviewArgs),
    #[clap(subcommand)]
    Installations(InstallationsCommand),
    /// Deletes processed videos older than the retention period.
    PurgeVideos(PurgeVideosArgs),
}

#[derive(Debug, Args)]
struct PreviewArgs {
    url: String,
}

#[derive(Debug, Subcommand)]
enum InstallationsCommand {
    List,
    Delete(DeleteInstallationArgs),
}

#[derive(Debug, Args)]
struct DeleteInstallationArgs {
    #[arg(long)]
    team_id: String,

    #[arg(long)]
    enterprise_id: Option<String>,
}

#[derive(Debug, Args)]
struct PurgeVideosArgs {
    /// Defaults to VIDEO_RETENTION_HOURS.
    #[arg(long)]
    older_than_hours: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let app = App::parse();
    let config = Config::from_env()?;

    match app.command {
        Command::Preview(args) => {
            let manifest = Manifest::load(&config.manifest_path).await?;
            let bluesky = connect_bluesky(&config, build_http_client()?, &manifest).await?;
            let builder = UnfurlBuilder::new(bluesky, config.unroll_threads);

            match builder.create_unfurl(&args.url).await {
                Some(prepared) => println!("{}", serde_json::to_string_pretty(&prepared.unfurl)?),
                None => {
                    return Err(AppError::BadRequest(format!("Not a supported post URL: {}", args.url)));
                },
            }
        },
        Command::Installations(InstallationsCommand::List) => {
            let store = open_installation_store(&config).await?;

            for installation in store.list_installations().await? {
                println!(
                    "{}\t{}\t{}\t{}",
                    installation.enterprise_id.as_deref().unwrap_or("-"),
                    installation.team_id,
                    installation.team_name.as_deref().unwrap_or("-"),
                    chrono::DateTime::from_timestamp(installation.installed_at, 0)
                        .map(|installed_at| installed_at.to_rfc3339())
                        .unwrap_or_default(),
                );
            }
        },
        Command::Installations(InstallationsCommand::Delete(args)) => {
            let store = open_installation_store(&config).await?;
            let deleted = store.delete_installation(args.enterprise_id.as_deref(), Some(&args.team_id), None).await?;

            info!(team_id = %args.team_id, deleted, "Deleted installation");
            println!("Deleted {} installation(s)", deleted);
        },
        Command::PurgeVideos(args) => {
            let videos = VideoProcessor::new(&config.video_storage_dir, &config.ffmpeg_path, config.max_concurrent_videos)?;
            let max_age = match args.older_than_hours {
                Some(hours) => hours_to_duration(hours, "--older-than-hours")?,
                None => config.video_retention,
            };

            let purged = videos.purge_older_than(max_age).await?;
            println!("Purged {} file(s)", purged);
        },
    }

    Ok(())
}
