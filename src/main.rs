use tracing::{error, info};

use engagement_harvester::core::config::{ForumSettingsStep, HarvestConfig, LmsSettingsStep};
use engagement_harvester::features::authenticator::LmsLoginStep;
use engagement_harvester::features::session_store::SessionStore;
use engagement_harvester::scraping::browser_manager::LaunchSettings;
use engagement_harvester::scraping::cdp::CdpDriver;
use engagement_harvester::tools::course_analytics::CourseAnalyticsStep;
use engagement_harvester::tools::forum::{ForumLoginStep, ForumWeeklyStep};
use engagement_harvester::tools::recordings::VideoAnalyticsStep;
use engagement_harvester::tools::roster::RosterStep;
use engagement_harvester::Pipeline;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,chromiumoxide=warn"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    dotenvy::dotenv().ok();
    let cfg = HarvestConfig::from_env();
    info!("Starting engagement harvester");
    info!(
        "state={} users={} analytics={} echo={} forum={} headless={}",
        cfg.state_path.display(),
        cfg.users_csv.display(),
        cfg.analytics_dir.display(),
        cfg.echo_dir.display(),
        cfg.forum_dir.display(),
        cfg.headless
    );

    let driver = CdpDriver::new(LaunchSettings {
        executable: cfg.chrome_executable.clone(),
        headless: cfg.headless,
        ..Default::default()
    });
    let store = SessionStore::new(&cfg.state_path);

    let pipeline = Pipeline::new(Box::new(driver), store.clone())
        .session_step("lms-settings", LmsSettingsStep)
        .enabled(cfg.step_enabled("lms-settings"))
        .context_step("lms-login", LmsLoginStep::new(store.clone()))
        .enabled(cfg.step_enabled("lms-login"))
        .page_step(
            "roster",
            RosterStep {
                users_csv: cfg.users_csv.clone(),
            },
        )
        .enabled(cfg.step_enabled("roster"))
        .page_step(
            "course-analytics",
            CourseAnalyticsStep {
                analytics_dir: cfg.analytics_dir.clone(),
                download_timeout: cfg.download_timeout,
            },
        )
        .enabled(cfg.step_enabled("course-analytics"))
        .page_step(
            "video-analytics",
            VideoAnalyticsStep {
                echo_dir: cfg.echo_dir.clone(),
                download_timeout: cfg.download_timeout,
            },
        )
        .enabled(cfg.step_enabled("video-analytics"))
        .session_step("forum-settings", ForumSettingsStep)
        .enabled(cfg.step_enabled("forum-settings"))
        .context_step("forum-login", ForumLoginStep { store })
        .enabled(cfg.step_enabled("forum-login"))
        .page_step(
            "forum-weekly",
            ForumWeeklyStep {
                forum_dir: cfg.forum_dir.clone(),
                download_timeout: cfg.download_timeout,
            },
        )
        .enabled(cfg.step_enabled("forum-weekly"));

    match pipeline.run().await {
        Ok(session) => {
            let students = session.course_users().map(|u| u.len()).unwrap_or(0);
            info!("Harvest complete ({} active students)", students);
            Ok(())
        }
        Err(e) => {
            error!("Harvest failed: {}", e);
            Err(e.into())
        }
    }
}
