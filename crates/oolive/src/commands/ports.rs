//! `oolive ports`: list attached card-reader stations.

use oolive_core::reader::reader_ports;

use crate::error::CliError;

pub fn handle() -> Result<(), CliError> {
    let ports = reader_ports()?;
    if ports.is_empty() {
        println!("No card reader found.");
        return Ok(());
    }

    println!("{:<20} {:<16} PRODUCT", "PORT", "SERIAL");
    for port in ports {
        println!(
            "{:<20} {:<16} {}",
            port.port_name,
            port.serial_number.as_deref().unwrap_or("-"),
            port.product.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}
