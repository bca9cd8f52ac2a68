use std::net::SocketAddr;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use leaf_service_rs::{
    advice::AdviceResolver,
    app::{self, AppState},
    config::Config,
    draw::Annotator,
    model::{Model, TfDetector},
    openai::OpenAiChat,
    overrides::OverrideTable,
    storage::ImageStore,
    utils::ensure_files_exist,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)),
        )
        .init();

    let config = Config::from_env()?;

    ensure_files_exist(
        &config.model_path,
        config.model_url.as_deref(),
        &config.class_list_path,
        config.class_list_url.as_deref(),
    )
    .await?;

    let model = Model::new(&config.model_path, &config.class_list_path)?;
    let overrides = OverrideTable::load(&config.overrides_path)?;
    let annotator = Annotator::from_font_path(config.label_font_path.as_deref());

    let chat = OpenAiChat::new(config.openai_api_key.clone())
        .with_base_url(&config.openai_base_url)
        .with_model(&config.openai_model);

    let store = ImageStore::new(
        &config.upload_dir,
        &config.output_dir,
        config.output_retention,
    );
    store.prepare().await?;

    let state = Arc::new(AppState {
        detector: Arc::new(TfDetector::new(model)),
        annotator: Arc::new(annotator),
        overrides: Arc::new(overrides),
        advisor: AdviceResolver::new(Arc::new(chat)),
        store,
    });

    let app = app::router(state, config.body_limit_bytes);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Listening on http://{}", addr);
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
