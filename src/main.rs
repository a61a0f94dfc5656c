use stress_test::{stress_test_scaling, stress_test_session, stress_test_text};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("error")))
        .init();

    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║            ASYNC STRESS TESTS                               ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    // Test 1: Text CRDT with small scale
    let stats = stress_test_text(4, 100).await;
    stats.print();

    // Test 2: Text CRDT with medium scale
    let stats = stress_test_text(10, 500).await;
    stats.print();

    // Test 3: Relayed session, small
    let stats = stress_test_session(3, 50).await;
    stats.print();

    // Test 4: Relayed session, medium
    let stats = stress_test_session(8, 100).await;
    stats.print();

    // Test 5: Scaling analysis
    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║          SCALING ANALYSIS (Text CRDT)                      ║");
    println!("╚════════════════════════════════════════════════════════════╝");
    stress_test_scaling(20, 4).await;

    println!("\n✓ All stress tests completed successfully!");
}
