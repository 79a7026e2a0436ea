//! Process bootstrap: configuration → database → clients → services →
//! task registry → scheduler → HTTP server.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use mediagate_api::webhook::WebhookState;
use mediagate_api::AppState;
use mediagate_core::repository::{
    CleanupRepository, CollectionRepository, LogRepository, MediaRepository, PersonRepository,
    TemplateRepository, UserRepository, WatchlistRepository,
};
use mediagate_core::scheduler::{
    Scheduler, HIGH_FREQ_CHAIN_JOB_ID, LOW_FREQ_CHAIN_JOB_ID, REVIVAL_CHECK_CRON,
    REVIVAL_CHECK_JOB_ID, SESSION_GC_CRON, SESSION_GC_JOB_ID,
};
use mediagate_core::service::template::PolicyPushMarkers;
use mediagate_core::service::{
    ActorSubscriptionProcessor, CleanupScanner, CollectionService, CoverGenerator, DailyQuota,
    ListImporter, MetadataProcessor, RecommendationEngine, TemplateService, Translator,
    WatchlistProcessor,
};
use mediagate_core::task::{run_chain, ProcessorKind, TaskContext, TaskQueue, TaskRegistry};
use mediagate_core::Config;
use mediagate_providers::{AiClient, DoubanClient, EmbyClient, MoviePilotClient, TmdbClient};
use mediagate_proxy::ProxyState;

pub struct Runtime {
    pub state: Arc<AppState>,
    pub proxy: Arc<ProxyState>,
    pub scheduler: Scheduler,
}

pub async fn init_database(config: &Config) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_secs(config.database.connect_timeout_seconds))
        .idle_timeout(Duration::from_secs(config.database.idle_timeout_seconds))
        .connect(&config.database.url)
        .await
        .context("database unreachable")?;

    sqlx::migrate!("../mediagate-core/migrations")
        .run(&pool)
        .await
        .context("migrations failed")?;
    Ok(pool)
}

pub async fn build_runtime(config: Config, pool: PgPool) -> Result<Runtime> {
    // ---- Provider clients ----
    let emby = Arc::new(EmbyClient::new(
        &config.library.url,
        &config.library.api_key,
        &config.library.user_id,
        Duration::from_secs(config.library.timeout_seconds),
    )?);
    let tmdb = Arc::new(TmdbClient::new(
        &config.metadata.base_url,
        &config.metadata.api_key,
        &config.metadata.language,
        Duration::from_secs(config.metadata.timeout_seconds),
    )?);
    let douban = if config.cultural.enabled && !config.cultural.base_url.is_empty() {
        Some(Arc::new(DoubanClient::new(
            &config.cultural.base_url,
            config.cultural.cookie.clone(),
            Duration::from_secs(config.cultural.timeout_seconds),
        )?))
    } else {
        None
    };
    let downloader = if config.downloader.url.is_empty() {
        None
    } else {
        Some(Arc::new(MoviePilotClient::new(
            &config.downloader.url,
            &config.downloader.username,
            &config.downloader.password,
            Duration::from_secs(config.downloader.timeout_seconds),
        )?))
    };
    let ai = if config.ai.enabled && !config.ai.api_key.is_empty() {
        Some(Arc::new(AiClient::new(
            &config.ai.base_url,
            &config.ai.api_key,
            &config.ai.model,
            &config.ai.embedding_model,
        )?))
    } else {
        None
    };

    // ---- Repositories ----
    let persons = PersonRepository::new(pool.clone());
    let media = MediaRepository::new(pool.clone());
    let watchlist_repo = WatchlistRepository::new(pool.clone());
    let users = UserRepository::new(pool.clone());
    let collections_repo = CollectionRepository::new(pool.clone());
    let cleanup_repo = CleanupRepository::new(pool.clone());
    let templates_repo = TemplateRepository::new(pool.clone());
    let log = LogRepository::new(pool.clone());

    // ---- Services ----
    let quota = Arc::new(DailyQuota::new(config.downloader.daily_quota));
    let markers = PolicyPushMarkers::new();
    let translator = Arc::new(Translator::new(persons.clone(), ai.clone()));

    let importer = Arc::new(ListImporter::new(
        tmdb.clone(),
        douban.clone(),
        ai.clone(),
        config.processing.resolve_concurrency,
    )?);
    let recommender = Arc::new(RecommendationEngine::new(
        media.clone(),
        ai.clone(),
        importer.clone(),
    ));
    let cover = if config.cover.enabled {
        Some(Arc::new(CoverGenerator::new(
            emby.clone(),
            &config.library.api_key,
            &config.cover.font_directory,
        )?))
    } else {
        None
    };

    let watchlist = Arc::new(WatchlistProcessor::new(
        watchlist_repo.clone(),
        emby.clone(),
        tmdb.clone(),
        downloader.clone(),
        quota.clone(),
    ));
    let collections = Arc::new(CollectionService::new(
        collections_repo.clone(),
        media.clone(),
        watchlist_repo.clone(),
        emby.clone(),
        importer.clone(),
        recommender.clone(),
        cover,
    ));
    let metadata = Arc::new(MetadataProcessor::new(
        emby.clone(),
        tmdb.clone(),
        douban,
        translator,
        persons.clone(),
        media.clone(),
        log.clone(),
        watchlist.clone(),
        collections.clone(),
        config.processing.quality_threshold,
        config.processing.role_prefix,
    ));
    let actors = Arc::new(ActorSubscriptionProcessor::new(
        tmdb.clone(),
        media.clone(),
        pool.clone(),
    ));
    let cleanup = Arc::new(CleanupScanner::new(
        cleanup_repo,
        media.clone(),
        emby.clone(),
        downloader.clone(),
        quota.clone(),
        config.library.admin_username.clone(),
        config.library.admin_password.clone(),
    ));
    let templates = Arc::new(TemplateService::new(
        templates_repo,
        users.clone(),
        emby.clone(),
        markers.clone(),
    ));

    // Stamp synthetic views with the real server's identity. Not fatal:
    // the proxy answers 503-equivalent empties until the server shows up.
    let server_id = match emby.get_server_id().await {
        Ok(id) => id,
        Err(e) => {
            tracing::warn!(error = %e, "library server id unavailable at boot");
            "unknown".to_string()
        }
    };

    // Mirror user policies once at boot so the permission SQL has data.
    if let Err(e) = sync_user_policies(&emby, &users).await {
        tracing::warn!(error = %e, "initial user policy sync failed");
    }

    // ---- Task queue + registry ----
    let queue = TaskQueue::start();
    let base_registry = Arc::new(build_task_registry(
        &metadata,
        &watchlist,
        &actors,
        &collections,
        &cleanup,
        &recommender,
        &users,
        &emby,
    ));
    let registry = Arc::new(build_chain_registry(&config, &base_registry));

    // ---- Scheduler ----
    let scheduler = Scheduler::new().await?;
    register_jobs(&scheduler, &config, &queue, &registry).await?;
    scheduler.start().await?;

    let state = Arc::new(AppState {
        webhook: WebhookState::new(&config.webhook),
        config: config.clone(),
        queue,
        registry,
        emby: emby.clone(),
        metadata,
        watchlist,
        actors,
        collections,
        cleanup,
        templates,
        recommender: recommender.clone(),
        downloader,
        quota,
        markers,
        media_repo: media.clone(),
        user_repo: users,
        log_repo: log,
        collection_repo: collections_repo.clone(),
        server_id: server_id.clone(),
    });

    let proxy = Arc::new(ProxyState {
        emby_base_url: config.library.url.trim_end_matches('/').to_string(),
        emby_api_key: config.library.api_key.clone(),
        server_id,
        config: config.proxy.clone(),
        collections: collections_repo,
        pool,
        recommender,
        http: mediagate_providers::http::build_client(Duration::from_secs(
            config.library.timeout_seconds,
        ))?,
    });

    Ok(Runtime {
        state,
        proxy,
        scheduler,
    })
}

/// Mirror every Library Server user's policy into the local snapshot table.
async fn sync_user_policies(emby: &Arc<EmbyClient>, users: &UserRepository) -> Result<()> {
    for user in emby.get_users().await? {
        let policy = user
            .policy
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?
            .unwrap_or(serde_json::Value::Null);
        users.upsert_user(&user.id, &user.name, &policy).await?;
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn build_task_registry(
    metadata: &Arc<MetadataProcessor>,
    watchlist: &Arc<WatchlistProcessor>,
    actors: &Arc<ActorSubscriptionProcessor>,
    collections: &Arc<CollectionService>,
    cleanup: &Arc<CleanupScanner>,
    recommender: &Arc<RecommendationEngine>,
    users: &UserRepository,
    emby: &Arc<EmbyClient>,
) -> TaskRegistry {
    let mut registry = TaskRegistry::new();

    {
        let metadata = metadata.clone();
        let emby = emby.clone();
        registry.register(
            "process-all-media",
            "全量媒体处理",
            ProcessorKind::Media,
            move |ctx| {
                let metadata = metadata.clone();
                let emby = emby.clone();
                Box::pin(async move { process_full_library(&ctx, &emby, &metadata).await })
            },
        );
    }
    {
        let metadata = metadata.clone();
        registry.register(
            "enrich-person-map",
            "演员数据补充",
            ProcessorKind::Media,
            move |ctx| {
                let metadata = metadata.clone();
                Box::pin(async move { metadata.enrich_person_map(&ctx).await })
            },
        );
    }
    {
        let watchlist = watchlist.clone();
        registry.register(
            "process-watchlist",
            "智能追剧扫描",
            ProcessorKind::Watchlist,
            move |ctx| {
                let watchlist = watchlist.clone();
                Box::pin(async move { watchlist.scan(&ctx, false).await })
            },
        );
    }
    {
        let watchlist = watchlist.clone();
        registry.register(
            "revival-check",
            "剧集复活检查",
            ProcessorKind::Watchlist,
            move |ctx| {
                let watchlist = watchlist.clone();
                Box::pin(async move { watchlist.scan(&ctx, true).await })
            },
        );
    }
    {
        let actors = actors.clone();
        registry.register(
            "actor-subscriptions-scan",
            "演员订阅扫描",
            ProcessorKind::Actor,
            move |ctx| {
                let actors = actors.clone();
                Box::pin(async move { actors.scan_all(&ctx).await })
            },
        );
    }
    {
        let collections = collections.clone();
        registry.register(
            "custom-collections-sync",
            "自定义合集同步",
            ProcessorKind::Media,
            move |ctx| {
                let collections = collections.clone();
                Box::pin(async move { collections.sync_all(&ctx).await })
            },
        );
    }
    {
        let recommender = recommender.clone();
        registry.register(
            "generate-embeddings",
            "生成媒体向量",
            ProcessorKind::Media,
            move |ctx| {
                let recommender = recommender.clone();
                Box::pin(async move { recommender.generate_missing_embeddings(&ctx).await })
            },
        );
    }
    {
        let cleanup = cleanup.clone();
        registry.register(
            "cleanup-scan",
            "重复版本扫描",
            ProcessorKind::Media,
            move |ctx| {
                let cleanup = cleanup.clone();
                Box::pin(async move { cleanup.scan(&ctx).await })
            },
        );
    }
    {
        let cleanup = cleanup.clone();
        registry.register(
            "resubscribe-low-quality",
            "媒体洗版",
            ProcessorKind::Media,
            move |ctx| {
                let cleanup = cleanup.clone();
                Box::pin(async move {
                    cleanup.resubscribe_low_quality(&ctx).await?;
                    Ok(())
                })
            },
        );
    }
    {
        let users = users.clone();
        registry.register(
            "session-gc",
            "清理过期会话",
            ProcessorKind::Media,
            move |_ctx| {
                let users = users.clone();
                Box::pin(async move {
                    let removed = users.gc_stale_sessions(chrono::Utc::now()).await?;
                    if removed > 0 {
                        tracing::info!(removed, "清理过期播放会话");
                    }
                    Ok(())
                })
            },
        );
    }

    registry
}

/// The chain entries wrap the base registry; their sequences reference the
/// leaf task keys registered above.
fn build_chain_registry(config: &Config, base: &Arc<TaskRegistry>) -> TaskRegistry {
    let mut registry = (**base).clone();

    for (key, name, chain) in [
        (
            "task-chain-high-freq",
            "高频核心任务链",
            &config.tasks.high_frequency,
        ),
        (
            "task-chain-low-freq",
            "低频维护任务链",
            &config.tasks.low_frequency,
        ),
    ] {
        let base = base.clone();
        let sequence = chain.sequence.clone();
        let max_runtime = chain.max_runtime_minutes;
        registry.register(key, name, ProcessorKind::Media, move |ctx| {
            let base = base.clone();
            let sequence = sequence.clone();
            Box::pin(async move { run_chain(ctx, base, sequence, max_runtime).await })
        });
    }

    registry
}

async fn register_jobs(
    scheduler: &Scheduler,
    config: &Config,
    queue: &TaskQueue,
    registry: &Arc<TaskRegistry>,
) -> Result<()> {
    for (job_id, task_key, chain) in [
        (
            HIGH_FREQ_CHAIN_JOB_ID,
            "task-chain-high-freq",
            &config.tasks.high_frequency,
        ),
        (
            LOW_FREQ_CHAIN_JOB_ID,
            "task-chain-low-freq",
            &config.tasks.low_frequency,
        ),
    ] {
        if !chain.enabled || chain.cron.is_empty() || chain.sequence.is_empty() {
            tracing::info!(job_id, "任务链未启用或配置不完整，跳过定时注册");
            continue;
        }
        let queue = queue.clone();
        let registry = registry.clone();
        let key = task_key.to_string();
        scheduler
            .replace_job(job_id, &chain.cron, move || {
                registry.submit(&queue, &key);
            })
            .await?;
    }

    // Fixed weekly revival check.
    {
        let queue = queue.clone();
        let registry = registry.clone();
        scheduler
            .replace_job(REVIVAL_CHECK_JOB_ID, REVIVAL_CHECK_CRON, move || {
                registry.submit(&queue, "revival-check");
            })
            .await?;
    }

    // Stale-session GC.
    {
        let queue = queue.clone();
        let registry = registry.clone();
        scheduler
            .replace_job(SESSION_GC_JOB_ID, SESSION_GC_CRON, move || {
                registry.submit(&queue, "session-gc");
            })
            .await?;
    }

    Ok(())
}

/// Full-library pass: walk every movie/series view and process each item.
async fn process_full_library(
    ctx: &TaskContext,
    emby: &Arc<EmbyClient>,
    metadata: &Arc<MetadataProcessor>,
) -> mediagate_core::Result<()> {
    let views = emby.get_views(emby.user_id()).await?;
    let libraries: Vec<_> = views
        .into_iter()
        .filter(|v| {
            matches!(
                v.collection_type.as_deref(),
                Some("movies" | "tvshows" | "mixed")
            )
        })
        .collect();

    for library in libraries {
        let mut start_index = 0i64;
        loop {
            ctx.check_stop()?;
            let page = emby
                .get_children(&library.id, Some("Movie,Series"), None, start_index, 200)
                .await?;
            if page.items.is_empty() {
                break;
            }
            let fetched = page.items.len() as i64;
            for item in page.items {
                ctx.check_stop()?;
                if let Err(e) = metadata.process(ctx, &item.id, false).await {
                    if e.is_cancelled() {
                        return Err(e);
                    }
                    tracing::error!(item = %item.name, error = %e, "item processing failed");
                }
            }
            start_index += fetched;
            let total = page.total_record_count.max(1);
            ctx.update(
                ((start_index * 100) / total).min(100) as i32,
                &format!("{}: 已处理 {start_index}/{total}", library.name),
            );
            if start_index >= page.total_record_count {
                break;
            }
        }
    }
    Ok(())
}
