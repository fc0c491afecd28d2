use crate::repository::{
    Airdrop, CrosschainAddress, Listing, LogEntry, Nft, NftOwner, Offer, TrackedContract,
};
use comfy_table::{Cell, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use csv::Writer;
use serde_json::{Value, json};

#[derive(Debug, Clone)]
pub enum OutputFormat {
    Table,
    Json,
    Csv,
}

impl From<&str> for OutputFormat {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => OutputFormat::Json,
            "csv" => OutputFormat::Csv,
            _ => OutputFormat::Table,
        }
    }
}

/// Rows of one result set, kept in both tabular and JSON form.
struct Rendered {
    empty_message: &'static str,
    header: Vec<&'static str>,
    rows: Vec<Vec<String>>,
    json: Vec<Value>,
}

impl Rendered {
    fn render(self, format: &OutputFormat) -> String {
        match format {
            OutputFormat::Table => {
                if self.rows.is_empty() {
                    return self.empty_message.to_string();
                }
                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL)
                    .apply_modifier(UTF8_ROUND_CORNERS)
                    .set_header(self.header);
                for row in self.rows {
                    table.add_row(row.into_iter().map(Cell::new).collect::<Vec<_>>());
                }
                table.to_string()
            }
            OutputFormat::Json => {
                serde_json::to_string_pretty(&self.json).unwrap_or_else(|_| "[]".to_string())
            }
            OutputFormat::Csv => {
                let mut wtr = Writer::from_writer(vec![]);
                let _ = wtr.write_record(&self.header);
                for row in &self.rows {
                    let _ = wtr.write_record(row);
                }
                String::from_utf8(wtr.into_inner().unwrap_or_default()).unwrap_or_default()
            }
        }
    }
}

pub fn format_contracts(
    contracts: &[(TrackedContract, Vec<CrosschainAddress>)],
    format: &OutputFormat,
) -> String {
    let mut rows = Vec::new();
    let mut values = Vec::new();

    for (contract, peers) in contracts {
        let name = contract
            .metadata
            .as_ref()
            .map(|m| format!("{} ({})", m.name, m.symbol))
            .unwrap_or_default();
        let peer_list = peers
            .iter()
            .map(|p| format!("{}:{:?}", p.peer_network_id, p.peer_address))
            .collect::<Vec<_>>()
            .join(" ");

        rows.push(vec![
            contract.network_id.to_string(),
            format!("{:?}", contract.address),
            contract.protocol.to_string(),
            name,
            contract.last_filter_block.to_string(),
            contract.base_uri.clone().unwrap_or_default(),
            peer_list,
        ]);
        values.push(json!({
            "network_id": contract.network_id,
            "address": format!("{:?}", contract.address),
            "protocol": contract.protocol,
            "last_filter_block": contract.last_filter_block,
            "name": contract.metadata.as_ref().map(|m| m.name.clone()),
            "symbol": contract.metadata.as_ref().map(|m| m.symbol.clone()),
            "owner": contract.metadata.as_ref().map(|m| format!("{:?}", m.owner)),
            "logo_uri": contract.metadata.as_ref().map(|m| m.logo_uri.clone()),
            "is_base": contract.metadata.as_ref().map(|m| m.is_base),
            "base_uri": contract.base_uri,
            "crosschain": peers.iter().map(|p| json!({
                "network_id": p.peer_network_id,
                "address": format!("{:?}", p.peer_address),
            })).collect::<Vec<_>>(),
        }));
    }

    Rendered {
        empty_message: "No tracked contracts.",
        header: vec![
            "Network",
            "Address",
            "Protocol",
            "Name",
            "Last Block",
            "Base URI",
            "Cross-chain",
        ],
        rows,
        json: values,
    }
    .render(format)
}

pub fn format_tokens(tokens: &[(Nft, Vec<NftOwner>)], format: &OutputFormat) -> String {
    let mut rows = Vec::new();
    let mut values = Vec::new();

    for (nft, owners) in tokens {
        let owner_list = owners
            .iter()
            .map(|o| format!("{:?}={}", o.owner, o.amount))
            .collect::<Vec<_>>()
            .join(" ");
        rows.push(vec![
            nft.token_id.to_string(),
            nft.token_uri.clone(),
            format!("{:?}", nft.creator),
            nft.latest_listing_id
                .map(|id| id.to_string())
                .unwrap_or_default(),
            owner_list,
        ]);
        values.push(json!({
            "token_id": nft.token_id.to_string(),
            "token_uri": nft.token_uri,
            "creator": format!("{:?}", nft.creator),
            "latest_listing_id": nft.latest_listing_id.map(|id| id.to_string()),
            "owners": owners.iter().map(|o| json!({
                "owner": format!("{:?}", o.owner),
                "amount": o.amount.to_string(),
            })).collect::<Vec<_>>(),
        }));
    }

    Rendered {
        empty_message: "No tokens found.",
        header: vec!["Token ID", "URI", "Creator", "Latest Listing", "Owners"],
        rows,
        json: values,
    }
    .render(format)
}

pub fn format_listings(listings: &[Listing], format: &OutputFormat) -> String {
    let rows = listings
        .iter()
        .map(|l| {
            vec![
                l.network_id.to_string(),
                l.listing_id.to_string(),
                format!("{:?}", l.seller),
                format!("{:?}", l.collection),
                l.token_id.to_string(),
                l.price.to_string(),
                l.list_amount.to_string(),
                l.status.as_str().to_string(),
            ]
        })
        .collect();
    let values = listings
        .iter()
        .map(|l| {
            json!({
                "network_id": l.network_id,
                "listing_id": l.listing_id.to_string(),
                "marketplace": format!("{:?}", l.marketplace),
                "seller": format!("{:?}", l.seller),
                "collection": format!("{:?}", l.collection),
                "token_id": l.token_id.to_string(),
                "price": l.price.to_string(),
                "list_amount": l.list_amount.to_string(),
                "status": l.status,
            })
        })
        .collect();

    Rendered {
        empty_message: "No listings found.",
        header: vec![
            "Network",
            "Listing",
            "Seller",
            "Collection",
            "Token ID",
            "Price",
            "Remaining",
            "Status",
        ],
        rows,
        json: values,
    }
    .render(format)
}

pub fn format_offers(offers: &[Offer], format: &OutputFormat) -> String {
    let rows = offers
        .iter()
        .map(|o| {
            vec![
                o.offer_index.to_string(),
                format!("{:?}", o.offerer),
                o.price.to_string(),
                o.amount.to_string(),
                o.accepted.to_string(),
            ]
        })
        .collect();
    let values = offers
        .iter()
        .map(|o| {
            json!({
                "listing_id": o.listing_id.to_string(),
                "offer_index": o.offer_index.to_string(),
                "offerer": format!("{:?}", o.offerer),
                "price": o.price.to_string(),
                "amount": o.amount.to_string(),
                "accepted": o.accepted,
            })
        })
        .collect();

    Rendered {
        empty_message: "No offers found.",
        header: vec!["Index", "Offerer", "Price", "Amount", "Accepted"],
        rows,
        json: values,
    }
    .render(format)
}

pub fn format_airdrops(drops: &[Airdrop], format: &OutputFormat) -> String {
    let rows = drops
        .iter()
        .map(|d| {
            vec![
                d.drop_id.to_string(),
                d.supply.to_string(),
                d.minted.to_string(),
                d.start_time.to_rfc3339(),
                d.end_time.to_rfc3339(),
                d.price.to_string(),
                d.has_whitelist_phase.to_string(),
                d.mint_limit_per_wallet.to_string(),
            ]
        })
        .collect();
    let values = drops
        .iter()
        .map(|d| {
            json!({
                "drop_id": d.drop_id.to_string(),
                "supply": d.supply.to_string(),
                "minted": d.minted.to_string(),
                "start_time": d.start_time,
                "end_time": d.end_time,
                "price": d.price.to_string(),
                "has_whitelist_phase": d.has_whitelist_phase,
                "whitelist_end_time": d.whitelist_end_time,
                "whitelist_price": d.whitelist_price.to_string(),
                "mint_limit_per_wallet": d.mint_limit_per_wallet.to_string(),
            })
        })
        .collect();

    Rendered {
        empty_message: "No airdrops found.",
        header: vec![
            "Drop",
            "Supply",
            "Minted",
            "Start",
            "End",
            "Price",
            "Whitelist",
            "Per Wallet",
        ],
        rows,
        json: values,
    }
    .render(format)
}

pub fn format_logs(entries: &[LogEntry], format: &OutputFormat) -> String {
    let rows = entries
        .iter()
        .map(|e| {
            vec![
                e.id.to_string(),
                e.created_at.to_rfc3339(),
                e.kind.clone(),
                e.content.clone(),
            ]
        })
        .collect();
    let values = entries
        .iter()
        .map(|e| {
            json!({
                "id": e.id,
                "created_at": e.created_at,
                "kind": e.kind,
                "content": e.content,
            })
        })
        .collect();

    Rendered {
        empty_message: "No log entries.",
        header: vec!["ID", "Time", "Kind", "Content"],
        rows,
        json: values,
    }
    .render(format)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::ListingStatus;
    use alloy_primitives::{U256, address};

    fn listing() -> Listing {
        Listing {
            network_id: 5,
            listing_id: U256::from(1),
            marketplace: address!("0x00000000000000000000000000000000000000d1"),
            seller: address!("0x00000000000000000000000000000000000000a1"),
            collection: address!("0x00000000000000000000000000000000000000c1"),
            token_id: U256::from(7),
            price: U256::from(50),
            list_amount: U256::from(3),
            status: ListingStatus::Listed,
        }
    }

    #[test]
    fn empty_table_prints_a_message() {
        assert_eq!(format_listings(&[], &OutputFormat::Table), "No listings found.");
        assert_eq!(format_listings(&[], &OutputFormat::Json), "[]");
    }

    #[test]
    fn csv_has_header_and_one_line_per_row() {
        let out = format_listings(&[listing()], &OutputFormat::Csv);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("Network,Listing"));
        assert!(lines[1].ends_with(",3,Listed"));
    }

    #[test]
    fn json_keeps_amounts_as_strings() {
        let out = format_listings(&[listing()], &OutputFormat::Json);
        let parsed: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed[0]["list_amount"], "3");
        assert_eq!(parsed[0]["status"], "Listed");
    }
}
