use std::env;
use std::process;
use std::sync::Arc;

use uuid::Uuid;

use newsletter_render::config::AppConfig;
use newsletter_render::db;
use newsletter_render::dispatch;
use newsletter_render::email::{EmailService, SmtpEmailService};
use newsletter_render::store::postgres::PgStore;
use newsletter_render::template::TeraTemplateEngine;
use newsletter_render::NewsletterRenderer;

const USAGE: &str = "Usage: newsletter-render send <newsletter-id>\n       \
                     newsletter-render preview <newsletter-id> [--to <email>]";

enum Command {
    Send(Uuid),
    Preview(Uuid, Option<String>),
}

fn parse_args(args: &[String]) -> Result<Command, String> {
    let mut command = None;
    let mut newsletter_id = None;
    let mut to = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--to" => {
                i += 1;
                to = Some(args.get(i).ok_or("--to needs an address")?.clone());
            }
            "--help" | "-h" => return Err(USAGE.to_string()),
            "send" | "preview" if command.is_none() => command = Some(args[i].clone()),
            value if newsletter_id.is_none() && command.is_some() => {
                newsletter_id = Some(
                    Uuid::parse_str(value).map_err(|e| format!("Invalid newsletter id: {e}"))?,
                );
            }
            other => return Err(format!("Unknown argument: {other}")),
        }
        i += 1;
    }

    let id = newsletter_id.ok_or_else(|| USAGE.to_string())?;
    match command.as_deref() {
        Some("send") if to.is_none() => Ok(Command::Send(id)),
        Some("send") => Err("--to is only valid with preview".to_string()),
        Some("preview") => Ok(Command::Preview(id, to)),
        _ => Err(USAGE.to_string()),
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    dotenvy::dotenv().ok();

    let args: Vec<String> = env::args().collect();
    let command = match parse_args(&args) {
        Ok(command) => command,
        Err(message) => {
            eprintln!("{message}");
            process::exit(1);
        }
    };

    let config = AppConfig::from_env().expect("Failed to load config");
    let pool = db::create_pool(&config.database_url)
        .await
        .expect("Failed to create DB pool");

    db::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");

    let store = Arc::new(PgStore::new(pool));
    let mailer: Arc<dyn EmailService> = Arc::new(
        SmtpEmailService::new(
            &config.smtp_host,
            config.smtp_port,
            config.smtp_username.as_deref(),
            config.smtp_password.as_deref(),
            config.smtp_tls,
            config.smtp_from_email.clone(),
        )
        .expect("Failed to create SMTP email service"),
    );

    let renderer = NewsletterRenderer::new(
        config.render_config(),
        Arc::new(config.clone()),
        Arc::new(TeraTemplateEngine),
        store.clone(),
        store.clone(),
    );
    tracing::info!("Render settings: {:?}", renderer.config());

    match command {
        Command::Send(id) => {
            match dispatch::send_newsletter(
                &renderer,
                store.as_ref(),
                mailer.as_ref(),
                id,
                config.smtp_rate_limit_ms,
            )
            .await
            {
                Ok(summary) => {
                    println!("Sent: {}, Failed: {}", summary.sent, summary.failed);
                }
                Err(e) => {
                    tracing::error!("Send of newsletter {id} failed: {e}");
                    process::exit(1);
                }
            }
        }
        Command::Preview(id, to) => {
            match dispatch::send_preview(
                &renderer,
                store.as_ref(),
                mailer.as_ref(),
                id,
                to.as_deref(),
            )
            .await
            {
                Ok(email) if to.is_none() => println!("{}", email.html_body),
                Ok(_) => {}
                Err(e) => {
                    tracing::error!("Preview of newsletter {id} failed: {e}");
                    process::exit(1);
                }
            }
        }
    }
}
