use jobtrackr::db::Table;
use jobtrackr::email::{RawEmail, ingest_email};
use jobtrackr::models::{IngestionSource, IngestionStatus};
use jobtrackr::parsers::ParserRegistry;
use jobtrackr::processor::{BatchDriver, DriverConfig, run_workers};
use jobtrackr::{Database, Settings};
use tempfile::TempDir;

const INDEED_ALERT: &str = "From: Indeed <alert@indeed.com>\r
Subject: New Python jobs near Paris\r
Message-ID: <indeed-1@indeed.com>\r
Content-Type: text/html; charset=utf-8\r
\r
<html><body><table>\r
<tr><td style=\"padding:0px 0px 32px\"><table>\r
<tr><td><a href=\"https://fr.indeed.com/rc/clk?jk=aaa111&amp;from=ja\" style=\"font-size:16px\">Backend Engineer</a></td></tr>\r
<tr><td><span>ACME</span><span>4,1</span><span>- Paris (75)</span></td></tr>\r
</table></td></tr>\r
<tr><td style=\"padding:0px 0px 32px\"><table>\r
<tr><td><a href=\"https://fr.indeed.com/rc/clk?jk=bbb222&amp;from=ja\" style=\"font-size:16px\">Data Engineer</a></td></tr>\r
<tr><td><span>Initech</span><span>- Lyon (69)</span></td></tr>\r
</table></td></tr>\r
</table></body></html>\r
";

const LINKEDIN_ALERT: &str = "From: LinkedIn Job Alerts <jobalerts-noreply@linkedin.com>\r
Subject: Python: 2 new jobs\r
Message-ID: <li-1@linkedin.com>\r
Content-Type: text/html; charset=utf-8\r
\r
<html><body><table>\r
<tr><td><a href=\"https://www.linkedin.com/comm/jobs/view/777/?trk=eml\" style=\"font-size:16px;line-height:1.25\">Backend Engineer</a></td></tr>\r
<tr><td><p>Acme · Paris (75)</p></td></tr>\r
</table></body></html>\r
";

struct Fixture {
    _dir: TempDir,
    db: Database,
    registry: ParserRegistry,
}

fn fixture() -> Fixture {
    let dir = TempDir::new().expect("tempdir");
    let db = Database::open(&dir.path().join("jobs.db")).expect("open");
    db.init().expect("init");
    Fixture {
        _dir: dir,
        db,
        registry: ParserRegistry::with_defaults(&Settings::default().alert_keywords),
    }
}

fn ingest(fx: &Fixture, raw: &str) -> jobtrackr::email::IngestStats {
    let email = RawEmail::parse(raw.as_bytes()).expect("parse email");
    let (stats, _) =
        ingest_email(&fx.registry, &email, IngestionSource::Email, Some(&fx.db)).expect("ingest");
    stats
}

#[test]
fn test_alerts_become_grouped_opportunities() {
    let mut fx = fixture();

    let indeed = ingest(&fx, INDEED_ALERT);
    assert_eq!(indeed.jobs_found, 2);
    assert_eq!(indeed.jobs_staged, 2);
    let linkedin = ingest(&fx, LINKEDIN_ALERT);
    assert_eq!(linkedin.jobs_staged, 1);

    let summary = BatchDriver::new("test-worker", DriverConfig::default())
        .run(&mut fx.db)
        .expect("run");
    assert_eq!(summary.succeeded, 3);
    assert_eq!(summary.failed, 0);

    assert_eq!(fx.db.count(Table::Postings).expect("count"), 3);
    assert_eq!(fx.db.count(Table::Opportunities).expect("count"), 2);

    // The same role seen on both boards lands under one opportunity
    let opportunities = fx.db.list_opportunities().expect("list");
    let backend = opportunities
        .iter()
        .find(|o| o.opportunity.title == "Backend Engineer")
        .expect("backend opportunity");
    assert_eq!(backend.posting_count, 2);
    assert_eq!(backend.opportunity.url, "https://indeed.com/viewjob?jk=aaa111");

    let postings = fx
        .db
        .postings_for_opportunity(backend.opportunity.id)
        .expect("postings");
    let mut urls: Vec<_> = postings
        .iter()
        .filter_map(|p| p.canonical_url.clone())
        .collect();
    urls.sort();
    assert_eq!(
        urls,
        vec![
            "https://indeed.com/viewjob?jk=aaa111".to_string(),
            "https://www.linkedin.com/jobs/view/777".to_string(),
        ]
    );

    let counts = fx.db.status_counts().expect("counts");
    assert_eq!(counts, vec![(IngestionStatus::Processed, 3)]);
}

#[test]
fn test_reingesting_an_alert_stages_nothing_new() {
    let mut fx = fixture();
    ingest(&fx, INDEED_ALERT);
    BatchDriver::new("w", DriverConfig::default())
        .run(&mut fx.db)
        .expect("run");

    let again = ingest(&fx, INDEED_ALERT);
    assert_eq!(again.jobs_found, 2);
    assert_eq!(again.jobs_staged, 0);
    assert_eq!(again.duplicates, 2);

    let summary = BatchDriver::new("w", DriverConfig::default())
        .run(&mut fx.db)
        .expect("run");
    assert_eq!(summary.succeeded, 0);
    assert_eq!(fx.db.count(Table::Ingested).expect("count"), 2);
    assert_eq!(fx.db.count(Table::Postings).expect("count"), 2);
}

#[test]
fn test_parallel_workers_share_one_database() {
    let fx = fixture();
    ingest(&fx, INDEED_ALERT);
    ingest(&fx, LINKEDIN_ALERT);

    let config = DriverConfig {
        batch_size: 1,
        ..DriverConfig::default()
    };
    let summary = run_workers(fx.db.path(), 3, &config).expect("workers");
    assert_eq!(summary.succeeded, 3);
    assert_eq!(fx.db.count(Table::Postings).expect("count"), 3);
    assert_eq!(fx.db.count(Table::Opportunities).expect("count"), 2);
}
