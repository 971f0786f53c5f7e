use colored::Colorize;

pub fn handle(filter: Option<&str>) {
    let routes = stackflow_core::describe_routes();
    let mut current: Option<&str> = None;
    let mut shown = 0;

    for (target, operation) in &routes {
        if filter.is_some_and(|f| !target.contains(f)) {
            continue;
        }
        if current != Some(target.as_str()) {
            if current.is_some() {
                println!();
            }
            println!("{}", target.cyan().bold());
            current = Some(target.as_str());
        }
        println!("  {}", operation);
        shown += 1;
    }

    if shown == 0 {
        eprintln!("{}", "No matching operations".yellow());
    }
}
