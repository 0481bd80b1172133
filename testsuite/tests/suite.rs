//! Runs the single-threaded suite on the host.

#[test]
fn suite() {
    ratesink_testsuite::run_test_suite();
}
