use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use progress_api::{CreateCommentRequest, ProgressApi, SubmitUpdateRequest};
use progress_core::{
    CommentId, ContractId, FreelancerId, PageRequest, ProjectId, SortSpec, UpdateFilter, UpdateId,
    UserId,
};
use progress_store_sqlite::SqliteStore;
use serde_json::Value;
use time::macros::format_description;
use time::Date;
use ulid::Ulid;

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "ptk")]
#[command(about = "Progress Tracker CLI")]
struct Cli {
    #[arg(long, default_value = "./progress_tracker.sqlite3")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
    Update {
        #[command(subcommand)]
        command: Box<UpdateCommand>,
    },
    Comment {
        #[command(subcommand)]
        command: CommentCommand,
    },
    Stats {
        #[command(subcommand)]
        command: StatsCommand,
    },
    Trend(TrendArgs),
    Stalled(StalledArgs),
    Rankings {
        #[command(subcommand)]
        command: RankingsCommand,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    SchemaVersion,
    Migrate(DbMigrateArgs),
    Backup(DbBackupArgs),
    Restore(DbRestoreArgs),
}

#[derive(Debug, Args)]
struct DbMigrateArgs {
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct DbBackupArgs {
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Args)]
struct DbRestoreArgs {
    #[arg(long = "in")]
    input: PathBuf,
}

#[derive(Debug, Subcommand)]
enum UpdateCommand {
    Add(UpdateFieldsArgs),
    Edit(UpdateEditArgs),
    Show(UpdateIdArg),
    Delete(UpdateIdArg),
    List(UpdateListArgs),
}

#[derive(Debug, Args)]
struct UpdateFieldsArgs {
    #[arg(long)]
    project_id: i64,
    #[arg(long)]
    contract_id: i64,
    #[arg(long)]
    freelancer_id: i64,
    #[arg(long)]
    title: String,
    #[arg(long)]
    description: Option<String>,
    #[arg(long)]
    progress: u8,
}

#[derive(Debug, Args)]
struct UpdateEditArgs {
    #[arg(long)]
    id: String,
    #[command(flatten)]
    fields: UpdateFieldsArgs,
}

#[derive(Debug, Args)]
struct UpdateIdArg {
    #[arg(long)]
    id: String,
}

#[derive(Debug, Args)]
struct UpdateListArgs {
    #[arg(long, default_value_t = 0)]
    page: u32,
    #[arg(long, default_value_t = 20)]
    size: u32,
    /// Sort expression, e.g. "created_at,desc" or "progress_percentage,asc".
    #[arg(long)]
    sort: Option<String>,
    #[arg(long)]
    project_id: Option<i64>,
    #[arg(long)]
    freelancer_id: Option<i64>,
    #[arg(long)]
    contract_id: Option<i64>,
    #[arg(long)]
    progress_min: Option<u8>,
    #[arg(long)]
    progress_max: Option<u8>,
    #[arg(long)]
    date_from: Option<String>,
    #[arg(long)]
    date_to: Option<String>,
    #[arg(long)]
    search: Option<String>,
}

#[derive(Debug, Subcommand)]
enum CommentCommand {
    Add(CommentAddArgs),
    Edit(CommentEditArgs),
    Show(CommentIdArg),
    Delete(CommentIdArg),
    List(CommentListArgs),
}

#[derive(Debug, Args)]
struct CommentAddArgs {
    #[arg(long)]
    update_id: String,
    #[arg(long)]
    user_id: i64,
    #[arg(long)]
    message: String,
}

#[derive(Debug, Args)]
struct CommentEditArgs {
    #[arg(long)]
    id: String,
    #[arg(long)]
    message: String,
}

#[derive(Debug, Args)]
struct CommentIdArg {
    #[arg(long)]
    id: String,
}

#[derive(Debug, Args)]
struct CommentListArgs {
    #[arg(long)]
    update_id: Option<String>,
}

#[derive(Debug, Subcommand)]
enum StatsCommand {
    Freelancer(EntityIdArg),
    Project(EntityIdArg),
    Contract(EntityIdArg),
    Dashboard,
}

#[derive(Debug, Args)]
struct EntityIdArg {
    #[arg(long)]
    id: i64,
}

#[derive(Debug, Args)]
struct TrendArgs {
    #[arg(long)]
    project_id: i64,
    #[arg(long)]
    from: Option<String>,
    #[arg(long)]
    to: Option<String>,
}

#[derive(Debug, Args)]
struct StalledArgs {
    #[arg(long, default_value_t = 7)]
    days: u32,
}

#[derive(Debug, Subcommand)]
enum RankingsCommand {
    Freelancers(RankingLimitArgs),
    Projects(RankingWindowArgs),
}

#[derive(Debug, Args)]
struct RankingLimitArgs {
    #[arg(long, default_value_t = 10)]
    limit: u32,
}

#[derive(Debug, Args)]
struct RankingWindowArgs {
    #[arg(long, default_value_t = 10)]
    limit: u32,
    #[arg(long)]
    from: Option<String>,
    #[arg(long)]
    to: Option<String>,
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn parse_date(raw: &str) -> Result<Date> {
    Date::parse(raw, format_description!("[year]-[month]-[day]"))
        .with_context(|| format!("invalid date (expected yyyy-mm-dd): {raw}"))
}

fn parse_update_id(raw: &str) -> Result<UpdateId> {
    let parsed =
        Ulid::from_string(raw).with_context(|| format!("invalid progress update id: {raw}"))?;
    Ok(UpdateId(parsed))
}

fn parse_comment_id(raw: &str) -> Result<CommentId> {
    let parsed =
        Ulid::from_string(raw).with_context(|| format!("invalid progress comment id: {raw}"))?;
    Ok(CommentId(parsed))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let api = ProgressApi::new(cli.db.clone());
    match cli.command {
        Command::Db { command } => run_db(&command, &cli.db),
        Command::Update { command } => run_update(*command, &api),
        Command::Comment { command } => run_comment(command, &api),
        Command::Stats { command } => run_stats(&command, &api),
        Command::Trend(args) => run_trend(&args, &api),
        Command::Stalled(args) => run_stalled(&args, &api),
        Command::Rankings { command } => run_rankings(&command, &api),
    }
}

fn run_db(command: &DbCommand, db_path: &std::path::Path) -> Result<()> {
    match command {
        DbCommand::SchemaVersion => {
            let store = SqliteStore::open(db_path)?;
            let status = store.schema_status()?;
            emit_json(serde_json::json!({
                "current_version": status.current_version,
                "target_version": status.target_version,
                "pending_versions": status.pending_versions,
                "up_to_date": status.pending_versions.is_empty()
            }))
        }
        DbCommand::Migrate(args) => {
            let mut store = SqliteStore::open(db_path)?;
            let before = store.schema_status()?;
            if args.dry_run {
                return emit_json(serde_json::json!({
                    "dry_run": true,
                    "current_version": before.current_version,
                    "target_version": before.target_version,
                    "would_apply_versions": before.pending_versions
                }));
            }
            store.migrate()?;
            let after = store.schema_status()?;
            emit_json(serde_json::json!({
                "dry_run": false,
                "before_version": before.current_version,
                "applied_versions": before.pending_versions,
                "after_version": after.current_version,
                "up_to_date": after.pending_versions.is_empty()
            }))
        }
        DbCommand::Backup(args) => {
            let store = SqliteStore::open(db_path)?;
            store.backup_database(&args.out)?;
            emit_json(serde_json::json!({ "backup_file": args.out }))
        }
        DbCommand::Restore(args) => {
            let mut store = SqliteStore::open(db_path)?;
            store.restore_database(&args.input)?;
            emit_json(serde_json::json!({ "restored_from": args.input }))
        }
    }
}

fn submit_request(fields: UpdateFieldsArgs) -> SubmitUpdateRequest {
    SubmitUpdateRequest {
        project_id: ProjectId(fields.project_id),
        contract_id: ContractId(fields.contract_id),
        freelancer_id: FreelancerId(fields.freelancer_id),
        title: fields.title,
        description: fields.description,
        progress_percentage: fields.progress,
    }
}

fn run_update(command: UpdateCommand, api: &ProgressApi) -> Result<()> {
    match command {
        UpdateCommand::Add(fields) => {
            let update = api.create_update(submit_request(fields))?;
            emit_json(serde_json::to_value(update)?)
        }
        UpdateCommand::Edit(args) => {
            let id = parse_update_id(&args.id)?;
            let update = api.modify_update(id, submit_request(args.fields))?;
            emit_json(serde_json::to_value(update)?)
        }
        UpdateCommand::Show(args) => {
            let update = api.find_update(parse_update_id(&args.id)?)?;
            emit_json(serde_json::to_value(update)?)
        }
        UpdateCommand::Delete(args) => {
            let id = parse_update_id(&args.id)?;
            api.delete_update(id)?;
            emit_json(serde_json::json!({ "deleted": args.id }))
        }
        UpdateCommand::List(args) => {
            let sort = match &args.sort {
                Some(raw) => SortSpec::parse(raw)?,
                None => SortSpec::default(),
            };
            let filter = UpdateFilter {
                project_id: args.project_id.map(ProjectId),
                freelancer_id: args.freelancer_id.map(FreelancerId),
                contract_id: args.contract_id.map(ContractId),
                progress_min: args.progress_min,
                progress_max: args.progress_max,
                created_from: args.date_from.as_deref().map(parse_date).transpose()?,
                created_to: args.date_to.as_deref().map(parse_date).transpose()?,
                search: args.search.clone(),
            };
            let page = PageRequest { page: args.page, size: args.size, sort };
            let result = api.list_updates_filtered(&filter, &page)?;
            emit_json(serde_json::to_value(result)?)
        }
    }
}

fn run_comment(command: CommentCommand, api: &ProgressApi) -> Result<()> {
    match command {
        CommentCommand::Add(args) => {
            let comment = api.create_comment(CreateCommentRequest {
                progress_update_id: parse_update_id(&args.update_id)?,
                user_id: UserId(args.user_id),
                message: args.message,
            })?;
            emit_json(serde_json::to_value(comment)?)
        }
        CommentCommand::Edit(args) => {
            let comment = api.modify_comment(parse_comment_id(&args.id)?, &args.message)?;
            emit_json(serde_json::to_value(comment)?)
        }
        CommentCommand::Show(args) => {
            let comment = api.find_comment(parse_comment_id(&args.id)?)?;
            emit_json(serde_json::to_value(comment)?)
        }
        CommentCommand::Delete(args) => {
            api.delete_comment(parse_comment_id(&args.id)?)?;
            emit_json(serde_json::json!({ "deleted": args.id }))
        }
        CommentCommand::List(args) => match &args.update_id {
            Some(raw) => {
                let views = api.comments_for_update(parse_update_id(raw)?)?;
                emit_json(serde_json::json!({ "comments": views }))
            }
            None => {
                let comments = api.list_comments()?;
                emit_json(serde_json::json!({ "comments": comments }))
            }
        },
    }
}

fn run_stats(command: &StatsCommand, api: &ProgressApi) -> Result<()> {
    match command {
        StatsCommand::Freelancer(args) => {
            let stats = api.stats_by_freelancer(FreelancerId(args.id))?;
            emit_json(serde_json::to_value(stats)?)
        }
        StatsCommand::Project(args) => {
            let stats = api.stats_by_project(ProjectId(args.id))?;
            emit_json(serde_json::to_value(stats)?)
        }
        StatsCommand::Contract(args) => {
            let stats = api.stats_by_contract(ContractId(args.id))?;
            emit_json(serde_json::to_value(stats)?)
        }
        StatsCommand::Dashboard => {
            let stats = api.dashboard_stats()?;
            emit_json(serde_json::to_value(stats)?)
        }
    }
}

fn run_trend(args: &TrendArgs, api: &ProgressApi) -> Result<()> {
    let from = args.from.as_deref().map(parse_date).transpose()?;
    let to = args.to.as_deref().map(parse_date).transpose()?;
    let trend = api.trend_by_project(ProjectId(args.project_id), from, to)?;
    emit_json(serde_json::json!({ "points": trend }))
}

fn run_stalled(args: &StalledArgs, api: &ProgressApi) -> Result<()> {
    let stalled = api.stalled_projects(args.days)?;
    emit_json(serde_json::json!({ "stalled_projects": stalled }))
}

fn run_rankings(command: &RankingsCommand, api: &ProgressApi) -> Result<()> {
    match command {
        RankingsCommand::Freelancers(args) => {
            let ranking = api.freelancers_by_activity(args.limit)?;
            emit_json(serde_json::json!({ "freelancers": ranking }))
        }
        RankingsCommand::Projects(args) => {
            let from = args.from.as_deref().map(parse_date).transpose()?;
            let to = args.to.as_deref().map(parse_date).transpose()?;
            let ranking = api.most_active_projects(args.limit, from, to)?;
            emit_json(serde_json::json!({ "projects": ranking }))
        }
    }
}
