use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use integrations::NotificationService;
use messaging::{
    create_casting_dialog, create_dialog, get_dialog_with_messages, get_user_dialogs,
    parse_message_type, send_message, CreateDialogRequest, MessagingConfig, MessagingContext,
    NotificationQueue, SendMessageRequest,
};
use shared::domain::{CastingId, DialogId, UserId};
use storage::{notifications, Storage};

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "sqlite://./data/messaging.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    CreateUser {
        display_name: String,
        #[arg(long, default_value = "model")]
        role: String,
    },
    CreateCasting {
        title: String,
        #[arg(long)]
        employer_user_id: Option<i64>,
    },
    CreateDialog {
        creator_user_id: i64,
        participant_user_ids: Vec<i64>,
        #[arg(long)]
        group: bool,
        #[arg(long)]
        title: Option<String>,
    },
    CastingDialog {
        casting_id: i64,
        employer_user_id: i64,
        model_user_id: i64,
    },
    Send {
        user_id: i64,
        dialog_id: i64,
        content: String,
        #[arg(long = "type", default_value = "text")]
        message_type: String,
    },
    ListDialogs {
        user_id: i64,
    },
    History {
        user_id: i64,
        dialog_id: i64,
        #[arg(long)]
        limit: Option<u32>,
    },
    Notifications {
        user_id: i64,
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let storage = Storage::new(&cli.database_url).await?;
    let config = MessagingConfig::default();
    let (queue, worker) = NotificationQueue::channel(config.notification_queue_capacity);
    let notifier: Arc<dyn NotificationService> = Arc::new(storage.clone());
    let worker_handle = worker.spawn(storage.clone(), notifier);
    let ctx = MessagingContext::with_storage(storage.clone(), queue, config);

    match cli.command {
        Command::CreateUser { display_name, role } => {
            let user_id = storage.create_user(&display_name, &role).await?;
            println!("created user_id={user_id}");
        }
        Command::CreateCasting {
            title,
            employer_user_id,
        } => {
            let casting_id = storage
                .create_casting(&title, employer_user_id.map(UserId))
                .await?;
            println!("created casting_id={casting_id}");
        }
        Command::CreateDialog {
            creator_user_id,
            participant_user_ids,
            group,
            title,
        } => {
            let view = create_dialog(
                &ctx,
                UserId(creator_user_id),
                CreateDialogRequest {
                    participant_ids: participant_user_ids.into_iter().map(UserId).collect(),
                    is_group: group,
                    title,
                    ..CreateDialogRequest::default()
                },
            )
            .await?;
            println!("created dialog_id={}", view.dialog_id);
        }
        Command::CastingDialog {
            casting_id,
            employer_user_id,
            model_user_id,
        } => {
            let view = create_casting_dialog(
                &ctx,
                CastingId(casting_id),
                UserId(employer_user_id),
                UserId(model_user_id),
            )
            .await?;
            println!("casting dialog_id={}", view.dialog_id);
        }
        Command::Send {
            user_id,
            dialog_id,
            content,
            message_type,
        } => {
            let mut request = SendMessageRequest::text(DialogId(dialog_id), content);
            request.message_type = parse_message_type(&message_type)?;
            let view = send_message(&ctx, UserId(user_id), request).await?;
            println!("sent message_id={}", view.message_id);
        }
        Command::ListDialogs { user_id } => {
            let dialogs = get_user_dialogs(&ctx, UserId(user_id), None, 0).await?;
            print_json(&dialogs)?;
        }
        Command::History {
            user_id,
            dialog_id,
            limit,
        } => {
            let page =
                get_dialog_with_messages(&ctx, UserId(user_id), DialogId(dialog_id), limit, None)
                    .await?;
            print_json(&page)?;
        }
        Command::Notifications { user_id, limit } => {
            let mut conn = storage.acquire().await?;
            for notification in
                notifications::list_notifications_for_user(&mut conn, UserId(user_id), limit)
                    .await?
            {
                println!(
                    "{} {} dialog={}",
                    notification.created_at.to_rfc3339(),
                    notification.title,
                    notification
                        .dialog_id
                        .map(|id| id.to_string())
                        .unwrap_or_else(|| "-".into())
                );
            }
        }
    }

    drop(ctx);
    worker_handle.await?;
    Ok(())
}
