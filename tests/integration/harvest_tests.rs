//! End-to-end harvests of a mock SFT site

use chrono::Weekday;
use listing_harvest::config::{parse_config, SiteConfig};
use listing_harvest::sites::SftAdapter;
use listing_harvest::storage::{RunStatus, SourceSpec, SqliteStore, Store};
use listing_harvest::{AdapterRegistry, Harvester, RunResult, SiteAdapter};
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SCHEDULE: &str = r#"
<html><body>
<div class="content">
  <h5>DOWNTOWN INCALL</h5>
  <h6>MONDAY</h6>
  <a href="/ava/">*ULTRA VIP* AVA 12PM-8PM</a>
  <a href="/bella/">BELLA 7PM-11PM</a>
  <h6>TUESDAY</h6>
  <a href="/ava/">*ULTRA VIP* AVA 11AM-LATE</a>
  <h5>NORTH YORK INCALL</h5>
  <h6>WEDNESDAY</h6>
  <a href="/cleo/">CLEO 5PM-10PM</a>
</div>
</body></html>
"#;

const SCHEDULE_WITHOUT_TUESDAY: &str = r#"
<html><body>
<div class="content">
  <h5>DOWNTOWN INCALL</h5>
  <h6>MONDAY</h6>
  <a href="/ava/">*ULTRA VIP* AVA 12PM-8PM</a>
  <a href="/bella/">BELLA 7PM-11PM</a>
  <h5>NORTH YORK INCALL</h5>
  <h6>WEDNESDAY</h6>
  <a href="/cleo/">CLEO 5PM-10PM</a>
</div>
</body></html>
"#;

/// Profile page whose header carries the given tier marker
fn profile(name: &str, tier: &str) -> String {
    format!(
        r#"<html><body><div class="content">
  <h1>{name}</h1>
  <p>*{tier}*</p>
  <p>Age: 24</p>
  <p>Weight: 120 lbs</p>
  <p>Bust: 34C</p>
  <img class="p_gallery_img" src="thumbnails/{name}_1.jpg">
</div></body></html>"#
    )
}

fn config_toml(server_uri: &str, db_path: &Path) -> String {
    format!(
        r#"
[harvest]
batch-size = 2
max-retries = 1
retry-backoff-ms = 1

[output]
database-path = "{db}"

[locations]
known-towns = ["Downtown", "North York"]

[[site]]
key = "sft"
name = "Test Friends"
short-name = "SFT"
schedule-url = "{uri}/schedule"
base-url = "{uri}/"
fetcher = "static"
rate-limit-seconds = 0.0

[[site.location]]
town = "Downtown"

[[site.location]]
town = "North York"
"#,
        db = db_path.display(),
        uri = server_uri
    )
}

async fn mount_page(server: &MockServer, route: &str, status: u16, body: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(status).set_body_string(body))
        .mount(server)
        .await;
}

async fn mount_profiles(server: &MockServer) {
    mount_page(server, "/ava", 200, &profile("ava", "ELITE")).await;
    mount_page(server, "/bella", 200, &profile("bella", "ELITE")).await;
    mount_page(server, "/cleo", 200, &profile("cleo", "VIP")).await;
}

struct Fixture {
    _dir: TempDir,
    db_path: std::path::PathBuf,
    harvester: Harvester,
}

impl Fixture {
    fn new(server: &MockServer) -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let db_path = dir.path().join("harvest.db");
        let config = parse_config(&config_toml(&server.uri(), &db_path)).expect("valid config");
        Self {
            _dir: dir,
            db_path,
            harvester: Harvester::new(config, "test-hash"),
        }
    }

    async fn run(&self) -> RunResult {
        let site = self.harvester.config().site("sft").expect("site").clone();
        self.harvester.run_site(&site).await
    }

    fn store(&self) -> SqliteStore {
        SqliteStore::open(&self.db_path).expect("store opens")
    }

    /// `(day, location_id, start, end)` rows for one listing
    fn schedules_of(&self, name: &str) -> Vec<(Weekday, i64, Option<String>, Option<String>)> {
        let mut store = self.store();
        let site = self.harvester.config().site("sft").expect("site");
        let source = store
            .get_or_create_source(&SourceSpec::from_site(site))
            .expect("source");
        let listing = store
            .find_listing(source.id, name)
            .expect("query")
            .expect("listing exists");
        store
            .listing_schedules(listing.id)
            .expect("schedules")
            .into_iter()
            .map(|s| (s.day, s.location_id, s.start_time, s.end_time))
            .collect()
    }
}

#[tokio::test]
async fn test_full_harvest_creates_listings() {
    let mock_server = MockServer::start().await;
    mount_page(&mock_server, "/schedule", 200, SCHEDULE).await;
    mount_profiles(&mock_server).await;
    let fixture = Fixture::new(&mock_server);

    let result = fixture.run().await;

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.schedule_items, 4);
    assert_eq!(result.total, 3);
    assert_eq!(result.new, 3);
    assert_eq!(result.errors, 0);

    let ava = fixture.schedules_of("Ava");
    assert_eq!(ava.len(), 2);
    assert_eq!(ava[0].0, Weekday::Mon);
    assert_eq!(ava[1].0, Weekday::Tue);
    assert_eq!(ava[1].3.as_deref(), Some("LATE"));

    let cleo = fixture.schedules_of("Cleo");
    assert_ne!(cleo[0].1, ava[0].1, "different towns resolve to different locations");

    let store = fixture.store();
    let runs = store.latest_runs(5).unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].new, 3);
    assert_eq!(runs[0].config_hash, "test-hash");
}

#[tokio::test]
async fn test_second_run_is_idempotent() {
    let mock_server = MockServer::start().await;
    mount_page(&mock_server, "/schedule", 200, SCHEDULE).await;
    mount_profiles(&mock_server).await;
    let fixture = Fixture::new(&mock_server);

    let first = fixture.run().await;
    let schedules_before = fixture.schedules_of("Ava");
    let stats_before = fixture.store().statistics().unwrap();

    let second = fixture.run().await;
    let stats_after = fixture.store().statistics().unwrap();

    assert_eq!(first.new, 3);
    assert_eq!(second.new, 0);
    assert_eq!(second.updated, 3);
    assert_eq!(fixture.schedules_of("Ava"), schedules_before);
    assert_eq!(stats_after.listings, stats_before.listings);
    assert_eq!(stats_after.schedules, stats_before.schedules);
    assert_eq!(stats_after.locations, stats_before.locations);
    assert_eq!(stats_after.runs, 2);
}

#[tokio::test]
async fn test_days_missing_from_schedule_are_removed() {
    let mock_server = MockServer::start().await;
    mount_page(&mock_server, "/schedule", 200, SCHEDULE).await;
    mount_profiles(&mock_server).await;
    let fixture = Fixture::new(&mock_server);

    fixture.run().await;
    assert_eq!(fixture.schedules_of("Ava").len(), 2);

    mock_server.reset().await;
    mount_page(&mock_server, "/schedule", 200, SCHEDULE_WITHOUT_TUESDAY).await;
    mount_profiles(&mock_server).await;

    let result = fixture.run().await;
    assert_eq!(result.updated, 3);

    let ava = fixture.schedules_of("Ava");
    assert_eq!(ava.len(), 1);
    assert_eq!(ava[0].0, Weekday::Mon);
}

#[tokio::test]
async fn test_one_failing_profile_does_not_stop_the_run() {
    let mock_server = MockServer::start().await;
    mount_page(&mock_server, "/schedule", 200, SCHEDULE).await;
    mount_page(&mock_server, "/ava", 200, &profile("ava", "ELITE")).await;
    mount_page(&mock_server, "/bella", 404, "gone").await;
    mount_page(&mock_server, "/cleo", 200, &profile("cleo", "VIP")).await;
    let fixture = Fixture::new(&mock_server);

    let result = fixture.run().await;

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.total, 3);
    assert_eq!(result.new, 2);
    assert_eq!(result.errors, 1);
    assert_eq!(result.error_details[0].profile.as_deref(), Some("bella"));
    assert!(result.error_details[0].error.contains("404"));
    assert_eq!(fixture.store().statistics().unwrap().listings, 2);
}

#[tokio::test]
async fn test_schedule_tier_wins_over_profile_tier() {
    let mock_server = MockServer::start().await;
    mount_page(&mock_server, "/schedule", 200, SCHEDULE).await;
    mount_profiles(&mock_server).await;
    let fixture = Fixture::new(&mock_server);

    fixture.run().await;

    let mut store = fixture.store();
    let site = fixture.harvester.config().site("sft").unwrap();
    let source = store.get_or_create_source(&SourceSpec::from_site(site)).unwrap();

    let ava = store.find_listing(source.id, "Ava").unwrap().unwrap();
    assert_eq!(ava.tier.as_deref(), Some("Ultra VIP"));

    let bella = store.find_listing(source.id, "Bella").unwrap().unwrap();
    assert_eq!(bella.tier.as_deref(), Some("Elite"));
    assert_eq!(bella.weight.as_deref(), Some("54 kg"));
    assert_eq!(bella.images, vec!["bella_1.jpg".to_string()]);
}

#[tokio::test]
async fn test_unreachable_schedule_fails_the_run() {
    let mock_server = MockServer::start().await;
    mount_page(&mock_server, "/schedule", 404, "nope").await;
    let fixture = Fixture::new(&mock_server);

    let result = fixture.run().await;

    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.total, 0);
    assert_eq!(result.errors, 1);
    assert_eq!(result.error_details[0].profile, None);

    let runs = fixture.store().latest_runs(1).unwrap();
    assert_eq!(runs[0].status, RunStatus::Failed);
}

fn build_mirror(site: &SiteConfig) -> Box<dyn SiteAdapter> {
    Box::new(SftAdapter::new(site))
}

#[tokio::test]
async fn test_parallel_runs_share_one_database() {
    let first_server = MockServer::start().await;
    let second_server = MockServer::start().await;
    for server in [&first_server, &second_server] {
        mount_page(server, "/schedule", 200, SCHEDULE).await;
        for name in ["ava", "bella", "cleo"] {
            Mock::given(method("GET"))
                .and(path(format!("/{}", name)))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_string(profile(name, "ELITE"))
                        .set_delay(Duration::from_millis(50)),
                )
                .mount(server)
                .await;
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("harvest.db");
    let mut config = parse_config(&config_toml(&first_server.uri(), &db_path)).unwrap();
    let mut mirror = config.site("sft").unwrap().clone();
    mirror.key = "sft-mirror".to_string();
    mirror.short_name = "SFT2".to_string();
    mirror.schedule_url = format!("{}/schedule", second_server.uri());
    mirror.base_url = format!("{}/", second_server.uri());
    config.sites.push(mirror);

    let mut registry = AdapterRegistry::with_builtin();
    registry.register("sft-mirror", build_mirror);
    let harvester = Harvester::new(config, "test-hash").with_registry(registry);

    let sites = harvester
        .select_sites(&["sft".to_string(), "sft-mirror".to_string()])
        .unwrap();
    let results = harvester.run_many(&sites, true).await;

    assert_eq!(results.len(), 2);
    for result in &results {
        assert_eq!(result.status, RunStatus::Completed, "{:?}", result.error_details);
        assert_eq!(result.new, 3);
        assert_eq!(result.errors, 0);
    }

    let store = SqliteStore::open(&db_path).unwrap();
    let stats = store.statistics().unwrap();
    assert_eq!(stats.sources, 2);
    assert_eq!(stats.listings, 6);
    assert_eq!(stats.runs, 2);
}
