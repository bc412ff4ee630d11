use crate::service::{AVAILABLE_SERVICES, FIXED_PORT};

/// Print the service catalog.
pub fn run_services_command() -> anyhow::Result<()> {
    println!("{:<20} PORT", "SERVICE");
    for service in AVAILABLE_SERVICES {
        let note = if service == FIXED_PORT {
            "  (shared edge port, 0.11.5 and later)"
        } else {
            ""
        };
        println!("{:<20} {}{}", service.name, service.port, note);
    }
    Ok(())
}
