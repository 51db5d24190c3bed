use keel_provisioner::{init_logging, try_init_logging, LogFormat};

#[test]
fn second_install_is_reported_not_fatal() {
    init_logging(LogFormat::Json);
    assert!(try_init_logging(LogFormat::Pretty).is_err());
    init_logging(LogFormat::Pretty);
}
