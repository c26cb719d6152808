use std::sync::Arc;

use warden_basic::{
    AuthDenial, BasicAuthenticator, BasicSettings, CredentialVerifier, Credentials, HelperVerifier,
    Verdict,
};
use warden_config::BasicAuthConfig;
use warden_test_support::fixtures::{basic_header, helper_program, sh_available, write_helper_script};

const PASSWORD_HELPER: &str = r#"while read -r user pass; do
  if [ "$pass" = "secret" ]; then echo "OK"; else echo "ERR bad password for $user"; fi
done"#;

const RAW_ECHO_HELPER: &str = r#"while read -r line; do echo "ERR $line"; done"#;

fn config_for(program: Vec<String>) -> BasicAuthConfig {
    let mut config = BasicAuthConfig {
        program,
        ..BasicAuthConfig::default()
    };
    config.children.max = 2;
    config
}

#[tokio::test]
async fn helper_verdicts_drive_authentication() -> anyhow::Result<()> {
    if !sh_available() {
        return Ok(());
    }
    let dir = tempfile::tempdir()?;
    let script = write_helper_script(dir.path(), "passwords.sh", PASSWORD_HELPER)?;
    let config = config_for(helper_program(&script));

    let verifier = Arc::new(HelperVerifier::start(&config)?);
    let pool = Arc::clone(verifier.pool());
    let auth = BasicAuthenticator::new(BasicSettings::from(&config), verifier)?;

    let accepted = auth.verify(basic_header("alice", "secret")).outcome().await;
    assert!(accepted.is_authenticated());

    let rejected = auth.verify(basic_header("bob", "nope")).outcome().await;
    assert_eq!(
        rejected.denial(),
        Some(&AuthDenial::VerificationFailed(Some(
            "bad password for bob".to_string()
        )))
    );

    auth.shutdown();
    pool.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn request_line_is_escaped_and_transcoded() -> anyhow::Result<()> {
    if !sh_available() {
        return Ok(());
    }
    let dir = tempfile::tempdir()?;
    let script = write_helper_script(dir.path(), "echo.sh", RAW_ECHO_HELPER)?;
    let mut config = config_for(helper_program(&script));
    config.utf8 = true;

    let verifier = HelperVerifier::start(&config)?;
    let credentials = Credentials::new(vec![b'j', 0xF6, b' ', b'r'], "a:b");
    let verdict = verifier.check(&credentials).await?;
    assert_eq!(
        verdict,
        Verdict::Rejected(Some("j%C3%B6%20r a%3Ab".to_string()))
    );

    let mut settings = BasicSettings::from(&config);
    settings.utf8 = false;
    verifier.reconfigure(&settings);
    let verdict = verifier.check(&credentials).await?;
    assert_eq!(verdict, Verdict::Rejected(Some("j%F6%20r a%3Ab".to_string())));

    verifier.pool().shutdown().await;
    Ok(())
}

#[tokio::test]
async fn stopped_pool_reports_unavailable() -> anyhow::Result<()> {
    if !sh_available() {
        return Ok(());
    }
    let dir = tempfile::tempdir()?;
    let script = write_helper_script(dir.path(), "passwords.sh", PASSWORD_HELPER)?;
    let config = config_for(helper_program(&script));

    let verifier = Arc::new(HelperVerifier::start(&config)?);
    verifier.pool().shutdown().await;
    let auth = BasicAuthenticator::new(BasicSettings::from(&config), verifier)?;

    let outcome = auth.verify(basic_header("alice", "secret")).outcome().await;
    assert_eq!(outcome.denial(), Some(&AuthDenial::PoolUnavailable));
    Ok(())
}
