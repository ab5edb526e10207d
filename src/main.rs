use actix_web::{middleware, web, App, HttpServer};
use log::{error, info, warn};
use log4rs::append::console::ConsoleAppender;
use log4rs::config::{Appender, Root};
use log4rs::encode::pattern::PatternEncoder;
use rust_doujin_scraper::app_state::AppState;
use rust_doujin_scraper::browser::ChromeLauncher;
use rust_doujin_scraper::config::{Config, StorageBackend};
use rust_doujin_scraper::db::{ComicStore, MemoryStore};
use rust_doujin_scraper::pg_db::PgStore;
use rust_doujin_scraper::storage::{MemoryStorage, ObjectStorage, S3Storage};
use rust_doujin_scraper::{api, rate_limit, scheduler};
use std::path::Path;
use std::sync::Arc;

const LOG_CONFIG: &str = "log4rs.yml";

/// Use `log4rs.yml` when present, otherwise log to the console.
fn init_logging() {
    if Path::new(LOG_CONFIG).exists() {
        match log4rs::init_file(LOG_CONFIG, Default::default()) {
            Ok(()) => return,
            Err(e) => eprintln!("Invalid {}: {}; logging to console", LOG_CONFIG, e),
        }
    }
    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new("{d(%Y-%m-%d %H:%M:%S)} {h({l})} {t} - {m}{n}")))
        .build();
    let config = log4rs::Config::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .build(Root::builder().appender("stdout").build(log::LevelFilter::Info));
    match config {
        Ok(config) => {
            if let Err(e) = log4rs::init_config(config) {
                eprintln!("Failed to initialise logging: {}", e);
            }
        }
        Err(e) => eprintln!("Failed to build logging config: {}", e),
    }
}

async fn open_store(cfg: &Config) -> Arc<dyn ComicStore> {
    let Some(url) = cfg.database.url.as_deref() else {
        warn!("No database configured; comics and thumbnails are kept in memory");
        return Arc::new(MemoryStore::new());
    };
    match PgStore::connect(url).await {
        Ok(store) => {
            info!("Connected to PostgreSQL");
            Arc::new(store)
        }
        Err(e) => {
            error!("PostgreSQL unavailable ({}); falling back to the in-memory store", e);
            Arc::new(MemoryStore::new())
        }
    }
}

async fn open_storage(cfg: &Config) -> Arc<dyn ObjectStorage> {
    match cfg.storage.backend {
        StorageBackend::S3 => Arc::new(S3Storage::from_config(&cfg.storage).await),
        StorageBackend::Memory => {
            warn!("Object storage backend is 'memory'; uploads are lost on restart");
            Arc::new(MemoryStorage::default())
        }
    }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    init_logging();
    std::panic::set_hook(Box::new(|info| {
        error!("panic: {}", info);
    }));

    let cfg = Config::load();
    info!("Scraping {}", cfg.site.base_url);
    info!(
        "Browser pool: {} session(s), headless={}, recycle every {}s",
        cfg.browser.pool_size, cfg.browser.headless, cfg.browser.recycle_interval_secs
    );

    let store = open_store(&cfg).await;
    let storage = open_storage(&cfg).await;
    let launcher = Arc::new(ChromeLauncher::new(cfg.browser.clone()));

    let state = AppState::new(cfg, launcher, store, storage).map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("failed to create HTTP client: {}", e),
        )
    })?;
    let data = web::Data::new(state);

    // Warm the pool without holding up the listener.
    let pool = Arc::clone(&data.pool);
    actix_web::rt::spawn(async move {
        let launched = pool.initialize().await;
        info!("[pool] warmed up with {} session(s)", launched);
    });

    scheduler::spawn(data.clone());

    let host = data.config.server.host.clone();
    let (first, last) = (data.config.server.port, data.config.server.port_end.max(data.config.server.port));

    // Try each port of the configured range until one binds
    let mut last_err: Option<std::io::Error> = None;
    for port in first..=last {
        let data_clone = data.clone();
        let addr = format!("{}:{}", host, port);
        match HttpServer::new(move || {
            App::new()
                .app_data(data_clone.clone())
                .wrap(middleware::from_fn(rate_limit::enforce))
                .wrap(middleware::Logger::default())
                .configure(api::configure)
        })
        .bind(&addr)
        {
            Ok(server) => {
                info!("Listening on {}", addr);
                return server.run().await;
            }
            Err(e) => {
                warn!("Cannot bind {}: {}", addr, e);
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::AddrInUse,
            format!("No available ports {}-{}", first, last),
        )
    }))
}
