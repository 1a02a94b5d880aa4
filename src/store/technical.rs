//! Technical data kept one-to-one with an item

use std::net::IpAddr;

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::db::{clean, decimal_column, decimal_param, StoreError};
use super::logs::{self, actions, NewLog};

const MAC_MAX_LEN: usize = 17;

/// Technical fields of an item. Also the upsert payload; every field is
/// optional and blanks are stored as NULL.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TechnicalData {
    pub host_name: Option<String>,
    pub wifi_mac: Option<String>,
    pub mac_address: Option<String>,
    pub internet_source: Option<String>,
    pub network: Option<String>,
    pub ip_address: Option<String>,
    pub build: Option<String>,
    pub city: Option<String>,
    pub price: Option<Decimal>,
    pub country: Option<String>,
    pub os: Option<String>,
    pub google_rd: Option<String>,
    pub pin: Option<String>,
    pub anydesk_id: Option<String>,
    pub anydesk_password: Option<String>,
    pub elevated_credential: Option<String>,
    pub edit_agent_date: Option<NaiveDate>,
    pub last_belarc_update: Option<NaiveDate>,
    pub last_system_update: Option<NaiveDate>,
    pub known_issues: Option<String>,
    pub pending_hw_replacements: Option<String>,
    pub previous_hw_replacements: Option<String>,
}

impl TechnicalData {
    fn validated(&self) -> Result<TechnicalData, StoreError> {
        let mut data = TechnicalData {
            host_name: clean(self.host_name.clone()),
            wifi_mac: clean(self.wifi_mac.clone()),
            mac_address: clean(self.mac_address.clone()),
            internet_source: clean(self.internet_source.clone()),
            network: clean(self.network.clone()),
            ip_address: clean(self.ip_address.clone()),
            build: clean(self.build.clone()),
            city: clean(self.city.clone()),
            price: Some(self.price.unwrap_or(Decimal::ZERO).round_dp(2)),
            country: clean(self.country.clone()),
            os: clean(self.os.clone()),
            google_rd: clean(self.google_rd.clone()),
            pin: clean(self.pin.clone()),
            anydesk_id: clean(self.anydesk_id.clone()),
            anydesk_password: clean(self.anydesk_password.clone()),
            elevated_credential: clean(self.elevated_credential.clone()),
            edit_agent_date: self.edit_agent_date,
            last_belarc_update: self.last_belarc_update,
            last_system_update: self.last_system_update,
            known_issues: clean(self.known_issues.clone()),
            pending_hw_replacements: clean(self.pending_hw_replacements.clone()),
            previous_hw_replacements: clean(self.previous_hw_replacements.clone()),
        };

        for (label, mac) in [("Wi-Fi MAC", &data.wifi_mac), ("MAC address", &data.mac_address)] {
            if mac.as_deref().is_some_and(|m| m.chars().count() > MAC_MAX_LEN) {
                return Err(StoreError::invalid(format!(
                    "{} must be at most {} characters",
                    label, MAC_MAX_LEN
                )));
            }
        }
        if let Some(ip) = &data.ip_address {
            let parsed: IpAddr = ip
                .parse()
                .map_err(|_| StoreError::invalid(format!("'{}' is not a valid IP address", ip)))?;
            data.ip_address = Some(parsed.to_string());
        }
        if data.price.is_some_and(|p| p < Decimal::ZERO) {
            return Err(StoreError::invalid("Price cannot be negative"));
        }
        Ok(data)
    }
}

const TECHNICAL_COLUMNS: &str = "host_name, wifi_mac, mac_address, internet_source, network,
    ip_address, build, city, price, country, os, google_rd, pin, anydesk_id, anydesk_password,
    elevated_credential, edit_agent_date, last_belarc_update, last_system_update, known_issues,
    pending_hw_replacements, previous_hw_replacements";

fn map_technical(row: &Row<'_>) -> rusqlite::Result<TechnicalData> {
    Ok(TechnicalData {
        host_name: row.get(0)?,
        wifi_mac: row.get(1)?,
        mac_address: row.get(2)?,
        internet_source: row.get(3)?,
        network: row.get(4)?,
        ip_address: row.get(5)?,
        build: row.get(6)?,
        city: row.get(7)?,
        price: Some(decimal_column(row, 8)?),
        country: row.get(9)?,
        os: row.get(10)?,
        google_rd: row.get(11)?,
        pin: row.get(12)?,
        anydesk_id: row.get(13)?,
        anydesk_password: row.get(14)?,
        elevated_credential: row.get(15)?,
        edit_agent_date: row.get(16)?,
        last_belarc_update: row.get(17)?,
        last_system_update: row.get(18)?,
        known_issues: row.get(19)?,
        pending_hw_replacements: row.get(20)?,
        previous_hw_replacements: row.get(21)?,
    })
}

pub fn get(conn: &Connection, item_id: i64) -> Result<Option<TechnicalData>, StoreError> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {} FROM technical_data WHERE item_id = ?1",
                TECHNICAL_COLUMNS
            ),
            [item_id],
            map_technical,
        )
        .optional()?)
}

/// Create or replace the technical record of an item
pub fn upsert(
    conn: &Connection,
    item_id: i64,
    uid: &str,
    form: &TechnicalData,
    user_id: Option<i64>,
) -> Result<TechnicalData, StoreError> {
    let data = form.validated()?;
    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO technical_data (item_id, {})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                     ?17, ?18, ?19, ?20, ?21, ?22, ?23)",
            TECHNICAL_COLUMNS
        ),
        params![
            item_id,
            data.host_name,
            data.wifi_mac,
            data.mac_address,
            data.internet_source,
            data.network,
            data.ip_address,
            data.build,
            data.city,
            decimal_param(data.price.unwrap_or(Decimal::ZERO)),
            data.country,
            data.os,
            data.google_rd,
            data.pin,
            data.anydesk_id,
            data.anydesk_password,
            data.elevated_credential,
            data.edit_agent_date,
            data.last_belarc_update,
            data.last_system_update,
            data.known_issues,
            data.pending_hw_replacements,
            data.previous_hw_replacements,
        ],
    )?;
    logs::record(
        conn,
        &NewLog::new(
            user_id,
            actions::TECHNICAL_DATA_SAVED,
            format!("Technical data saved for UID {}.", uid),
        )
        .item(item_id, uid),
    )?;
    Ok(data)
}

/// Record the operating system, creating the technical row when needed
pub fn set_os(conn: &Connection, item_id: i64, os: &str) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO technical_data (item_id, os) VALUES (?1, ?2)
         ON CONFLICT(item_id) DO UPDATE SET os = excluded.os",
        params![item_id, os],
    )?;
    Ok(())
}
