//! Tests for the exception and mail sinks in `src/notify/`.

use unilog::notify::{FailureReport, SendmailMailer, SentryDsn, SentryReporter};

fn report() -> FailureReport {
    FailureReport {
        hostname: "web-1".into(),
        action: "write_to_log".into(),
        name: "api".into(),
        target: "/var/log/api.log".into(),
        error: "disk full".into(),
        version: unilog::VERSION.into(),
    }
}

#[test]
fn dsn_without_secret_or_port() {
    let dsn = SentryDsn::parse("https://public@o1.ingest.example.com/7").expect("valid dsn");
    assert_eq!(
        dsn.store_url.as_str(),
        "https://o1.ingest.example.com/api/7/store/"
    );
    assert_eq!(dsn.secret_key, None);

    let header = dsn.auth_header();
    assert!(header.starts_with("Sentry sentry_version=7, "));
    assert!(header.contains(&format!("sentry_client=unilog/{}", unilog::VERSION)));
    assert!(header.ends_with("sentry_key=public"));
}

#[test]
fn reporter_rejects_bad_dsn() {
    assert!(SentryReporter::from_dsn("https://sentry.example.com/1").is_err());

    let reporter = SentryReporter::from_dsn("http://k@localhost:9000/3").expect("valid dsn");
    assert_eq!(
        reporter.dsn().store_url.as_str(),
        "http://localhost:9000/api/3/store/"
    );
}

#[tokio::test]
async fn mail_is_piped_to_the_program() {
    let mailer = SendmailMailer::new("ops@example.com", "oncall@example.com").with_program("cat");
    mailer.deliver(&report()).await.expect("cat accepts the message");
}

#[tokio::test]
async fn missing_program_is_an_error() {
    let mailer = SendmailMailer::new("a@b", "c@d").with_program("/nonexistent/sendmail");
    assert!(mailer.deliver(&report()).await.is_err());
}
