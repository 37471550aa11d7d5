use math_mentor_core::{
    session::{MockParser, MockRetriever, MockSolver},
    ConfidenceEngine, RecordStore, SessionCoordinator, SessionOutcome,
};
use std::env;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    info!("Math mentor pipeline starting");

    let store = match env::var("MATH_MENTOR_DB") {
        Ok(path) => RecordStore::open(&path).await?,
        Err(_) => RecordStore::in_memory().await?,
    };
    info!(location = %store.location(), "Record store ready");

    let coordinator = SessionCoordinator::new(
        Box::new(MockParser),
        Box::new(MockSolver),
        ConfidenceEngine::new(),
        store,
    )
    .with_retriever(Box::new(MockRetriever));

    let outcome = coordinator.run("Solve 2x + 5 = 13").await?;

    let report = match outcome {
        SessionOutcome::Completed(report) => report,
        SessionOutcome::NeedsClarification(pending) => {
            println!("Clarification needed: {}", pending.prompt);
            coordinator.resume(pending, "find x").await?
        }
    };

    println!("\n=== SESSION RESULT ===");
    println!("Session: {}", report.session_id);
    println!("Problem: {}", report.problem.text);
    if let Some(answer) = &report.solution.final_answer {
        println!("Answer: {}", answer);
    }
    println!(
        "Verified: correct={} confidence={:.2}",
        report.verification.is_correct, report.verification.confidence
    );
    for issue in &report.verification.issues {
        println!("  issue: {}", issue);
    }
    for warning in &report.verification.warnings {
        println!("  warning: {}", warning);
    }
    if report.verification.requires_human_review {
        println!("  flagged for human review");
    }

    match (&report.stored, &report.storage_error) {
        (Some(ids), _) => {
            println!(
                "Stored: problem={} solution={} verification={}",
                ids.problem_id, ids.solution_id, ids.verification_id
            );

            coordinator
                .add_feedback(ids.problem_id, true, "Looks right to me")
                .await?;

            let stats = coordinator.store().stats().await?;
            println!("\n=== STORE STATS ===");
            println!("Problems: {}", stats.total_problems);
            println!("Correct verifications: {}", stats.correct_verifications);
            println!("Average confidence: {:.2}", stats.average_confidence);
            println!(
                "Feedback: +{} / -{}",
                stats.positive_feedback, stats.negative_feedback
            );
        }
        (None, Some(error)) => {
            println!("Storage failed (result above still valid): {}", error);
        }
        (None, None) => {}
    }

    Ok(())
}
