use tablelog::setup_logging;

#[test]
fn test_logging_setup() {
    let result = std::panic::catch_unwind(|| {
        setup_logging();
        // A second call keeps the first subscriber instead of panicking.
        setup_logging();
    });

    assert!(result.is_ok(), "setup_logging function should not panic");
}
