use clap::{Parser, Subcommand};
use color_eyre::Result;
use qafka_sync::api::types::{CreateMessageRequest, CreateQueueRequest};
use qafka_sync::api::{CachedQueueClient, Resource, RestClient};
use qafka_sync::cache::QueryObserver;
use qafka_sync::config::Config;
use qafka_sync::event::{Event, EventHandler};
use qafka_sync::{KeyPattern, ResourceKey, ResourceKind};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "qafka-sync")]
#[command(about = "Cached command-line client for the qafka queue dashboard API")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./qafka.yaml, then $XDG_CONFIG_HOME/qafka/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Queue API server URL, overrides config and QAFKA_API_URL
  #[arg(long)]
  api_url: Option<String>,

  /// Write logs to a daily rolling file in the data directory instead of stderr
  #[arg(long)]
  log_file: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// List all queues
  Queues,
  /// Show one queue
  Queue { id: u64 },
  /// List messages
  Messages {
    #[arg(short, long)]
    queue: Option<u64>,
    #[arg(short, long)]
    limit: Option<u32>,
  },
  /// List workers
  Workers {
    #[arg(short, long)]
    queue: Option<u64>,
  },
  /// Create a queue
  CreateQueue {
    #[arg(long)]
    name: String,
    #[arg(long = "type", default_value = "fifo")]
    queue_type: String,
    #[arg(long, default_value = "")]
    description: String,
    /// JSON configuration blob
    #[arg(long, default_value = "")]
    config: String,
  },
  /// Delete a queue
  DeleteQueue { id: u64 },
  /// Enqueue a message
  Send {
    #[arg(short, long)]
    queue: u64,
    #[arg(short, long)]
    payload: String,
    #[arg(long)]
    priority: Option<i32>,
    #[arg(long)]
    max_retries: Option<u32>,
  },
  /// Keep queues, messages and workers up to date until Ctrl-C
  Watch {
    #[arg(short, long)]
    queue: Option<u64>,
    #[arg(short, long, default_value_t = 50)]
    limit: u32,
    /// Polling interval in milliseconds
    #[arg(long = "interval", default_value_t = 1000)]
    interval_ms: u64,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let _guard = init_logging(args.log_file)?;

  // Load configuration
  let mut config = Config::load(args.config.as_deref())?;
  if let Some(url) = args.api_url {
    config.api.url = url;
  }
  debug!(url = %config.api.url, "configuration loaded");

  let api = RestClient::new(&config.api)?;
  let client = CachedQueueClient::new(Arc::new(api), config.cache.to_cache_config());

  run(&client, args.command).await
}

fn init_logging(to_file: bool) -> Result<WorkerGuard> {
  let filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("qafka_sync=info"));

  let (writer, guard) = if to_file {
    let dir = Config::data_dir()?;
    std::fs::create_dir_all(&dir)?;
    tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "qafka-sync.log"))
  } else {
    tracing_appender::non_blocking(std::io::stderr())
  };

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(!to_file)
    .init();

  Ok(guard)
}

async fn run(client: &CachedQueueClient, command: Command) -> Result<()> {
  match command {
    Command::Queues => print_json(&client.queues().await?),
    Command::Queue { id } => print_json(&client.queue(id).await?),
    Command::Messages { queue, limit } => print_json(&client.messages(queue, limit).await?),
    Command::Workers { queue } => print_json(&client.workers(queue).await?),
    Command::CreateQueue {
      name,
      queue_type,
      description,
      config,
    } => {
      let request = CreateQueueRequest {
        name,
        description,
        queue_type,
        config,
      };
      print_json(&client.create_queue(request).await?)
    }
    Command::DeleteQueue { id } => {
      client.delete_queue(id).await?;
      info!(id, "queue deleted");
      Ok(())
    }
    Command::Send {
      queue,
      payload,
      priority,
      max_retries,
    } => {
      let request = CreateMessageRequest {
        queue_id: queue,
        payload,
        priority,
        scheduled_at: None,
        max_retries,
      };
      print_json(&client.create_message(request).await?)
    }
    Command::Watch {
      queue,
      limit,
      interval_ms,
    } => watch(client, queue, limit, Duration::from_millis(interval_ms)).await,
  }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

async fn watch(
  client: &CachedQueueClient,
  queue: Option<u64>,
  limit: u32,
  interval: Duration,
) -> Result<()> {
  let mut events = EventHandler::new(interval);

  let mut observers: Vec<QueryObserver<Resource>> = vec![
    client.observe(ResourceKey::queue_list()),
    client.observe(ResourceKey::messages(queue, Some(limit))?),
    client.observe(ResourceKey::workers(queue)?),
  ];
  for observer in &mut observers {
    observer.fetch();
  }

  // When each observer last settled in error; retried once per staleness window
  let mut failed_at: Vec<Option<Instant>> = vec![None; observers.len()];

  let subscriptions: Vec<_> = [
    ResourceKind::QueueList,
    ResourceKind::MessageList,
    ResourceKind::WorkerList,
  ]
  .into_iter()
  .map(|kind| {
    let tx = events.sender();
    client.bus().subscribe(KeyPattern::kind(kind), move |key| {
      let _ = tx.send(Event::Invalidated(key.clone()));
    })
  })
  .collect();

  while let Some(event) = events.next().await {
    match event {
      Event::Tick => {
        for (observer, last_failure) in observers.iter_mut().zip(failed_at.iter_mut()) {
          let snapshot = observer.snapshot();
          let due = if snapshot.is_error() {
            let window = client.cache().config().stale_after_for(observer.key().kind());
            last_failure.map_or(true, |at| at.elapsed() >= window)
          } else {
            snapshot.is_stale
          };
          if due && !snapshot.is_fetching {
            observer.fetch();
          }
          if observer.poll() {
            *last_failure = observer.is_error().then(Instant::now);
            report(observer);
          }
        }
      }
      Event::Invalidated(key) => info!(key = %key, "invalidated"),
      Event::Shutdown => break,
    }
  }

  for id in subscriptions {
    client.bus().unsubscribe(id);
  }
  Ok(())
}

fn report(observer: &QueryObserver<Resource>) {
  let snapshot = observer.snapshot();
  let updated = snapshot
    .fetched_at
    .map(|at| at.format("%H:%M:%S").to_string())
    .unwrap_or_else(|| "never".to_string());

  match (&snapshot.error, observer.data()) {
    (Some(error), _) if observer.is_error() => {
      warn!(key = %observer.key(), retries = snapshot.retry_count, "fetch failed");
      println!("{:<40} error after {} attempts: {}", observer.key().to_string(), snapshot.retry_count, error);
    }
    (_, Some(resource)) => {
      let marker = if snapshot.is_fetching {
        " (refreshing)"
      } else if snapshot.is_stale {
        " (stale)"
      } else {
        ""
      };
      println!("{:<40} {:>5} items, updated {}{}", observer.key().to_string(), resource.len(), updated, marker);
    }
    _ => debug!(key = %observer.key(), status = ?observer.status(), "waiting"),
  }
}
