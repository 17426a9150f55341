use actix_cors::Cors;
use actix_web::{middleware::Compress, web, App, HttpServer};
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi; // bring trait into scope for ApiDoc::openapi()
use utoipa_swagger_ui::SwaggerUi;

use pacepal::openapi::ApiDoc;
use pacepal::repo::Repo;
use pacepal::session::SessionStore;
use pacepal::{routes, AppConfig, AppState, StoreBackend};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load .env automatically only in debug builds; deployments set the environment themselves.
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }

    let cfg = match AppConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Invalid configuration: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    info!("Bootstrapping PacePal server");
    info!("Frontend URL: {}", cfg.frontend_url);

    let repo = match build_repo(&cfg.store).await {
        Ok(repo) => repo,
        Err(e) => {
            error!("storage backend unavailable: {e:#}");
            std::process::exit(1);
        }
    };

    let sessions = SessionStore::new(cfg.session_ttl);
    let _purge = sessions.spawn_cleanup(cfg.session_cleanup_every);
    let state = AppState::new(repo, sessions, cfg.bcrypt_cost).with_secure_cookie(cfg.cookie_secure);

    let openapi = ApiDoc::openapi();
    let frontend_url = cfg.frontend_url.clone();

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allowed_origin(&frontend_url)
            .allow_any_header()
            .allowed_methods(["GET", "POST", "PUT", "DELETE", "OPTIONS"])
            .supports_credentials()
            .max_age(3600);

        App::new()
            .wrap(TracingLogger::default())
            .wrap(Compress::default())
            .wrap(cors)
            .app_data(web::Data::new(state.clone()))
            .configure(routes::config)
            .service(SwaggerUi::new("/docs/{_:.*}").url("/docs/openapi.json", openapi.clone()))
    })
    .bind((cfg.bind.as_str(), cfg.port))?;

    info!("Listening on http://{}:{}", cfg.bind, cfg.port);

    server.run().await
}

async fn build_repo(store: &StoreBackend) -> anyhow::Result<Arc<dyn Repo>> {
    match store {
        #[cfg(feature = "inmem-store")]
        StoreBackend::Memory { data_dir } => {
            use pacepal::repo::inmem::InMemRepo;
            let repo = match data_dir {
                Some(dir) => {
                    info!("Using in-memory repository with snapshots in {}", dir.display());
                    InMemRepo::with_snapshot(dir)
                }
                None => {
                    info!("Using in-memory repository backend");
                    InMemRepo::new()
                }
            };
            Ok(Arc::new(repo))
        }
        #[cfg(feature = "postgres-store")]
        StoreBackend::Postgres { database_url } => {
            let repo = pacepal::repo::pg::PgRepo::connect_lazy(database_url, 5)?;
            repo.migrate().await?;
            info!("Using Postgres repository backend");
            Ok(Arc::new(repo))
        }
        #[allow(unreachable_patterns)]
        other => anyhow::bail!("backend {other:?} is not compiled in; rebuild with the matching cargo feature"),
    }
}
