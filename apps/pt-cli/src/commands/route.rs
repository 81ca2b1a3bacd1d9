// route.rs - Routing subcommands: route, suggest, report.

use pt_router::HostConfig;

pub fn route(config: &HostConfig, query: &str, json: bool) -> anyhow::Result<()> {
    let router = super::router(config)?;
    let decision = router.route(query);

    if json {
        println!("{}", serde_json::to_string_pretty(&decision)?);
        return Ok(());
    }

    println!(
        "{} [{}, confidence {:.0}%]",
        decision.target,
        decision.pattern,
        decision.confidence * 100.0
    );
    if !decision.is_plugin() {
        for suggestion in router.get_plugin_suggestions(query) {
            println!(
                "  maybe: {} ({:.0}%)",
                suggestion.plugin_name,
                suggestion.relevance * 100.0
            );
        }
    }
    Ok(())
}

pub fn suggest(config: &HostConfig, query: &str) -> anyhow::Result<()> {
    let suggestions = super::router(config)?.get_plugin_suggestions(query);
    if suggestions.is_empty() {
        println!("No suggestions for \"{}\".", query);
        return Ok(());
    }

    println!("{:<24} {:<20} {:<9} PROMISE", "ID", "POLICY", "RELEVANCE");
    println!("{}", "-".repeat(80));
    for s in suggestions {
        println!(
            "{:<24} {:<20} {:<9} {}",
            s.plugin_id,
            s.governing_policy.to_string(),
            format!("{:.0}%", s.relevance * 100.0),
            s.description
        );
    }
    Ok(())
}

pub fn report(config: &HostConfig) -> anyhow::Result<()> {
    print!("{}", super::router(config)?.routing_report());
    Ok(())
}
