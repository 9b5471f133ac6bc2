//! Scan command handler.

use gattline_btle::{AdvertFilter, DiscoveredPeer, PeerFilter};
use gattline_core::model::display_uuid;
use tabled::Tabled;

use crate::cli::{GlobalOpts, ScanArgs};
use crate::config::Context;
use crate::error::CliError;
use crate::output;

use super::session::{status, uuid_arg};

#[derive(Tabled)]
struct PeerRow {
    #[tabled(rename = "Address")]
    address: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "RSSI")]
    rssi: String,
    #[tabled(rename = "Services")]
    services: String,
    #[tabled(rename = "Vendor")]
    vendor: String,
}

fn row(peer: &DiscoveredPeer, color: bool) -> PeerRow {
    PeerRow {
        address: peer.address.to_string(),
        name: peer.name.clone().unwrap_or_default(),
        rssi: output::paint_rssi(peer.rssi, color),
        services: peer
            .services
            .iter()
            .map(display_uuid)
            .collect::<Vec<_>>()
            .join(", "),
        vendor: peer.vendor.as_ref().map_or_else(String::new, |v| {
            format!("product 0x{:02x} v{}", v.product_id, v.frame_control.version)
        }),
    }
}

fn build_filter(args: &ScanArgs) -> Result<PeerFilter, CliError> {
    let services = args
        .services
        .iter()
        .map(|raw| uuid_arg("service", raw))
        .collect::<Result<Vec<_>, _>>()?;

    let wants_vendor = args.vendor || args.binding || args.booting || !args.products.is_empty();
    let vendor = wants_vendor.then(|| AdvertFilter {
        binding: args.binding,
        booting: args.booting,
        product_ids: args.products.clone(),
        addresses: Vec::new(),
    });

    Ok(PeerFilter {
        pattern: args.name.clone(),
        services,
        min_rssi: args.min_rssi,
        vendor,
    })
}

pub async fn handle(args: ScanArgs, global: &GlobalOpts, ctx: &Context) -> Result<(), CliError> {
    let filter = build_filter(&args)?;
    let duration = args.duration.unwrap_or(ctx.config.defaults.scan_duration);

    let central = gattline_btle::central(ctx.adapter_index(global)).await?;
    status(
        ctx,
        &format!("Scanning for {}...", humantime::format_duration(duration)),
    );
    let peers = gattline_btle::scan(&central, duration, &filter).await?;

    let out = output::render_list(
        ctx.format,
        &peers,
        |p| row(p, ctx.color),
        |p| p.address.to_string(),
    )?;
    output::print_output(&out, ctx.quiet);
    Ok(())
}
