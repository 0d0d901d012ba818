//! Draft document types
use std::fmt;

use chrono::{DateTime, TimeZone, Utc};

use super::error::ValidationError;

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

impl<T: TimeZone> PartialOrd for TimeStamp<T>
where
    TimeStamp<T>: Eq,
{
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: TimeZone> Ord for TimeStamp<T>
where
    TimeStamp<T>: Eq,
{
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn new_with(
        year: i32,
        month: u32,
        day: u32,
        hour: u32,
        min: u32,
        sec: u32,
    ) -> Option<Self> {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .single()
            .map(Self)
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl fmt::Display for TimeStamp<Utc> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.to_rfc3339())
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

/// Workflow status of a draft. `FINALIZED` is terminal.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DraftStatus {
    #[n(0)]
    Draft,
    #[n(1)]
    PendingApproval,
    #[n(2)]
    Approved,
    #[n(3)]
    Rejected,
    #[n(4)]
    Finalized,
}

impl DraftStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DraftStatus::Draft => "DRAFT",
            DraftStatus::PendingApproval => "PENDING_APPROVAL",
            DraftStatus::Approved => "APPROVED",
            DraftStatus::Rejected => "REJECTED",
            DraftStatus::Finalized => "FINALIZED",
        }
    }

    /// Statuses in which the payload may change and the draft may be deleted.
    pub fn is_editable(&self) -> bool {
        matches!(self, DraftStatus::Draft | DraftStatus::Rejected)
    }
}

impl fmt::Display for DraftStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to a customer or business owned by another service.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct PartyRef {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub name: String,
}

impl PartyRef {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for PartyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

// amounts are integer minor units throughout
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct LineItem {
    #[n(0)]
    pub product_id: String,
    #[n(1)]
    pub description: String,
    #[n(2)]
    pub quantity: u32,
    #[n(3)]
    pub unit_price: i64,
    #[n(4)]
    pub tax_rate_bps: u32, // basis points, 1_000 = 10%
    #[n(5)]
    pub line_total: i64,
}

impl LineItem {
    pub fn new(
        product_id: impl Into<String>,
        description: impl Into<String>,
        quantity: u32,
        unit_price: i64,
    ) -> Self {
        Self {
            product_id: product_id.into(),
            description: description.into(),
            quantity,
            unit_price,
            tax_rate_bps: 0,
            line_total: unit_price.saturating_mul(i64::from(quantity)),
        }
    }
    pub fn set_tax_rate_bps(mut self, bps: u32) -> Self {
        self.tax_rate_bps = bps;
        self
    }
}

impl fmt::Display for LineItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} x {} [{}] @ {} = {}",
            self.quantity, self.description, self.product_id, self.unit_price, self.line_total
        )
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Default, PartialEq, Eq)]
pub struct Totals {
    #[n(0)]
    pub subtotal: i64,
    #[n(1)]
    pub tax_amount: i64,
    #[n(2)]
    pub discount_amount: i64,
    #[n(3)]
    pub total_amount: i64,
}

impl Totals {
    pub fn new(total_amount: i64) -> Self {
        Self {
            subtotal: total_amount,
            total_amount,
            ..Self::default()
        }
    }

    fn validate(&self) -> Result<(), ValidationError> {
        let amounts = [
            ("subtotal", self.subtotal),
            ("tax_amount", self.tax_amount),
            ("discount_amount", self.discount_amount),
            ("total_amount", self.total_amount),
        ];
        match amounts.iter().find(|(_, amount)| *amount < 0) {
            Some((field, _)) => Err(ValidationError::NegativeAmount(*field)),
            None => Ok(()),
        }
    }
}

/// The business content of a draft. The engine snapshots it but does not
/// interpret it beyond the mandatory-field check in [`DraftPayload::validate`].
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Default, PartialEq, Eq)]
pub struct DraftPayload {
    #[n(0)]
    pub customer: Option<PartyRef>,
    #[n(1)]
    pub business: Option<PartyRef>,
    #[n(2)]
    pub line_items: Vec<LineItem>,
    #[n(3)]
    pub totals: Option<Totals>,
    #[n(4)]
    pub notes: Option<String>,
    #[n(5)]
    pub due_date: Option<TimeStamp<Utc>>,
    #[n(6)]
    pub shipping_address: Option<String>,
    #[n(7)]
    pub source_sale_id: Option<String>,
    #[n(8)]
    pub source_invoice_id: Option<String>,
}

impl DraftPayload {
    /// Start an empty payload, filled in with the `set_*` methods
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_customer(mut self, customer: PartyRef) -> Self {
        self.customer = Some(customer);
        self
    }
    pub fn set_business(mut self, business: PartyRef) -> Self {
        self.business = Some(business);
        self
    }
    pub fn add_line_item(mut self, item: LineItem) -> Self {
        self.line_items.push(item);
        self
    }
    pub fn set_totals(mut self, totals: Totals) -> Self {
        self.totals = Some(totals);
        self
    }
    pub fn set_total_amount(mut self, amount: i64) -> Self {
        self.totals = Some(Totals::new(amount));
        self
    }
    pub fn set_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
    pub fn set_due_date(mut self, date: TimeStamp<Utc>) -> Self {
        self.due_date = Some(date);
        self
    }
    pub fn set_shipping_address(mut self, address: impl Into<String>) -> Self {
        self.shipping_address = Some(address.into());
        self
    }
    pub fn set_source_sale_id(mut self, sale_id: impl Into<String>) -> Self {
        self.source_sale_id = Some(sale_id.into());
        self
    }

    /// A draft must name who it bills (customer or business) and carry totals.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.customer.is_none() && self.business.is_none() {
            return Err(ValidationError::MissingParty);
        }
        let totals = self.totals.as_ref().ok_or(ValidationError::MissingTotals)?;
        totals.validate()?;
        if self.line_items.iter().any(|item| item.unit_price < 0) {
            return Err(ValidationError::NegativeAmount("unit_price"));
        }

        Ok(())
    }
}

/// A partial update to a draft payload. `None` leaves a field as it is; an
/// empty string clears `notes` or `shipping_address`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DraftPatch {
    pub customer: Option<PartyRef>,
    pub business: Option<PartyRef>,
    pub line_items: Option<Vec<LineItem>>,
    pub totals: Option<Totals>,
    pub notes: Option<String>,
    pub due_date: Option<TimeStamp<Utc>>,
    pub shipping_address: Option<String>,
}

impl DraftPatch {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_customer(mut self, customer: PartyRef) -> Self {
        self.customer = Some(customer);
        self
    }
    pub fn set_business(mut self, business: PartyRef) -> Self {
        self.business = Some(business);
        self
    }
    pub fn set_line_items(mut self, items: Vec<LineItem>) -> Self {
        self.line_items = Some(items);
        self
    }
    pub fn set_totals(mut self, totals: Totals) -> Self {
        self.totals = Some(totals);
        self
    }
    pub fn set_total_amount(mut self, amount: i64) -> Self {
        self.totals = Some(Totals::new(amount));
        self
    }
    pub fn set_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
    pub fn set_due_date(mut self, date: TimeStamp<Utc>) -> Self {
        self.due_date = Some(date);
        self
    }
    pub fn set_shipping_address(mut self, address: impl Into<String>) -> Self {
        self.shipping_address = Some(address.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn apply_to(&self, payload: &DraftPayload) -> DraftPayload {
        let mut next = payload.clone();
        if let Some(customer) = &self.customer {
            next.customer = Some(customer.clone());
        }
        if let Some(business) = &self.business {
            next.business = Some(business.clone());
        }
        if let Some(items) = &self.line_items {
            next.line_items = items.clone();
        }
        if let Some(totals) = &self.totals {
            next.totals = Some(totals.clone());
        }
        if let Some(notes) = &self.notes {
            next.notes = non_blank(notes);
        }
        if let Some(due_date) = &self.due_date {
            next.due_date = Some(due_date.clone());
        }
        if let Some(address) = &self.shipping_address {
            next.shipping_address = non_blank(address);
        }
        next
    }
}

fn non_blank(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Caller identity as supplied by the identity provider. Only recorded for
/// audit; the engine does not authorise on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: String,
    pub role: Option<String>,
}

impl Actor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: None,
        }
    }
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Draft {
    #[n(0)]
    pub id: String, // uuid7, bech32 encoded
    #[n(1)]
    pub draft_number: String,
    #[n(2)]
    pub version: u64,
    #[n(3)]
    pub status: DraftStatus,
    #[n(4)]
    pub payload: DraftPayload,
    #[n(5)]
    pub linked_invoice_id: Option<String>,
    #[n(6)]
    pub rejection_reason: Option<String>,
    #[n(7)]
    pub created_at: TimeStamp<Utc>,
    #[n(8)]
    pub updated_at: TimeStamp<Utc>,
    #[n(9)]
    pub submitted_at: Option<TimeStamp<Utc>>,
    #[n(10)]
    pub approved_at: Option<TimeStamp<Utc>>,
    #[n(11)]
    pub rejected_at: Option<TimeStamp<Utc>>,
    #[n(12)]
    pub finalized_at: Option<TimeStamp<Utc>>,
    #[n(13)]
    pub created_by: String,
    #[n(14)]
    pub submitted_by: Option<String>,
    #[n(15)]
    pub approved_by: Option<String>,
    #[n(16)]
    pub rejected_by: Option<String>,
}

impl Draft {
    /// A fresh draft at version 1. The caller seeds the ledger with its snapshot.
    pub fn open(
        id: String,
        draft_number: String,
        payload: DraftPayload,
        actor: &Actor,
        now: TimeStamp<Utc>,
    ) -> Self {
        Self {
            id,
            draft_number,
            version: 1,
            status: DraftStatus::Draft,
            payload,
            linked_invoice_id: None,
            rejection_reason: None,
            created_at: now.clone(),
            updated_at: now,
            submitted_at: None,
            approved_at: None,
            rejected_at: None,
            finalized_at: None,
            created_by: actor.id.clone(),
            submitted_by: None,
            approved_by: None,
            rejected_by: None,
        }
    }

    pub fn customer_name(&self) -> Option<&str> {
        self.payload.customer.as_ref().map(|c| c.name.as_str())
    }

    /// `linkedInvoiceId` iff FINALIZED, `rejectionReason` iff REJECTED.
    pub fn status_fields_consistent(&self) -> bool {
        let finalized = self.status == DraftStatus::Finalized;
        let rejected = self.status == DraftStatus::Rejected;
        self.linked_invoice_id.is_some() == finalized && self.rejection_reason.is_some() == rejected
    }
}
