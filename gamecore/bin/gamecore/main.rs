mod handlers;

use clap::{CommandFactory, Parser};
use gamecore::{
    cli::{GamecoreArgs, GamecoreSubcommand, GameSubcommand, ServerSubcommand, TaskSubcommand},
    utils::{self, LOG_SUBDIR},
    GamecoreResult,
};
use handlers::Context;

//--------------------------------------------------------------------------------------------------
// Functions: main
//--------------------------------------------------------------------------------------------------

#[tokio::main]
async fn main() -> GamecoreResult<()> {
    dotenvy::dotenv().ok();

    // Parse command line arguments
    let args = GamecoreArgs::parse();
    let Some(subcommand) = args.subcommand else {
        GamecoreArgs::command().print_help()?;
        return Ok(());
    };

    // Only the daemon writes log files
    let home_dir = utils::get_gamecore_home();
    let log_dir = home_dir.join(LOG_SUBDIR);
    let serving = matches!(subcommand, GamecoreSubcommand::Serve);
    let _guard = gamecore::init_tracing(args.verbose, serving.then_some(log_dir.as_path()));
    utils::check_or_set_env();

    let ctx = Context::open(&home_dir, args.dry_run).await?;
    match subcommand {
        GamecoreSubcommand::Serve => handlers::serve_subcommand(&ctx).await?,
        GamecoreSubcommand::Game { subcommand } => match subcommand {
            GameSubcommand::Import { path } => handlers::game_import_subcommand(&ctx, path).await?,
            GameSubcommand::List => handlers::game_list_subcommand(&ctx).await?,
        },
        GamecoreSubcommand::Server { subcommand } => match subcommand {
            ServerSubcommand::Create {
                name,
                game,
                memory,
                cpus,
                max_backups,
                envs,
            } => {
                handlers::server_create_subcommand(&ctx, name, game, memory, cpus, max_backups, envs)
                    .await?;
            }
            ServerSubcommand::List => handlers::server_list_subcommand(&ctx).await?,
            ServerSubcommand::Show { id } => handlers::server_show_subcommand(&ctx, id).await?,
            ServerSubcommand::Edit {
                id,
                name,
                memory,
                cpus,
                max_backups,
                envs,
                ports,
            } => {
                handlers::server_edit_subcommand(
                    &ctx,
                    id,
                    name,
                    memory,
                    cpus,
                    max_backups,
                    envs,
                    ports,
                )
                .await?;
            }
            ServerSubcommand::Start { id } => {
                let gameserver = ctx.orchestrator.start_gameserver(id).await?;
                handlers::print_status(&gameserver);
            }
            ServerSubcommand::Stop { id } => {
                let gameserver = ctx.orchestrator.stop_gameserver(id).await?;
                handlers::print_status(&gameserver);
            }
            ServerSubcommand::Restart { id } => {
                let gameserver = ctx.orchestrator.restart_gameserver(id).await?;
                handlers::print_status(&gameserver);
            }
            ServerSubcommand::Delete { id } => handlers::server_delete_subcommand(&ctx, id).await?,
            ServerSubcommand::Backup { id, label } => {
                handlers::server_backup_subcommand(&ctx, id, label).await?;
            }
            ServerSubcommand::Backups { id } => {
                for label in ctx.orchestrator.list_backups(id).await? {
                    println!("{}", label);
                }
            }
            ServerSubcommand::Restore { id, label } => {
                ctx.orchestrator.restore_backup(id, &label).await?;
                println!("restored {} into gameserver {}", label, id);
            }
            ServerSubcommand::Files { id, subcommand } => {
                handlers::server_files_subcommand(&ctx, id, subcommand).await?;
            }
        },
        GamecoreSubcommand::Task { subcommand } => match subcommand {
            TaskSubcommand::Add {
                server,
                name,
                task_type,
                cron,
                disabled,
            } => {
                handlers::task_add_subcommand(&ctx, server, name, task_type, cron, disabled).await?;
            }
            TaskSubcommand::List { server } => handlers::task_list_subcommand(&ctx, server).await?,
            TaskSubcommand::Edit {
                id,
                name,
                task_type,
                cron,
                status,
            } => {
                handlers::task_edit_subcommand(&ctx, id, name, task_type, cron, status).await?;
            }
            TaskSubcommand::Delete { id } => {
                ctx.orchestrator.delete_task(id).await?;
                println!("deleted task {}", id);
            }
            TaskSubcommand::Run { id } => handlers::task_run_subcommand(&ctx, id).await?,
        },
        GamecoreSubcommand::System => handlers::system_subcommand(&ctx).await?,
    }

    Ok(())
}
