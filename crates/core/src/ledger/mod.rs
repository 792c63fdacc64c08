//! Quota ledger: allocated, used and reserved leave units per (employee, leave type, period).
//!
//! Every mutation keeps `used + reserved <= allocated`. Reservations are single-use: once
//! committed or released they can never be settled again.

use std::fmt;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::employee::EmployeeId;
use crate::domain::leave_request::LeaveRequestId;
use crate::domain::leave_type::LeaveTypeCode;
use crate::errors::LeaveError;

/// Calendar year a quota applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LeavePeriod(pub i32);

impl LeavePeriod {
    pub fn containing(date: NaiveDate) -> Self {
        Self(date.year())
    }
}

impl fmt::Display for LeavePeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuotaKey {
    pub employee_id: EmployeeId,
    pub leave_type: LeaveTypeCode,
    pub period: LeavePeriod,
}

impl fmt::Display for QuotaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.employee_id, self.leave_type, self.period)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReservationId(pub String);

impl ReservationId {
    pub fn generate() -> Self {
        Self(format!("RSV-{}", Uuid::new_v4()))
    }
}

impl fmt::Display for ReservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationState {
    Held,
    Committed,
    Released,
}

impl ReservationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Held => "held",
            Self::Committed => "committed",
            Self::Released => "released",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "held" => Some(Self::Held),
            "committed" => Some(Self::Committed),
            "released" => Some(Self::Released),
            _ => None,
        }
    }
}

/// Handle for a provisional hold against a quota record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub key: QuotaKey,
    pub request_id: LeaveRequestId,
    pub units: u32,
    pub state: ReservationState,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaAdjustment {
    pub allocation: Option<u32>,
    pub carried_over: Option<u32>,
    pub emergency_grant: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaSnapshot {
    pub employee_id: EmployeeId,
    pub leave_type: LeaveTypeCode,
    pub period: LeavePeriod,
    pub allocated: u32,
    pub used: u32,
    pub reserved: u32,
    pub remaining: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaRecord {
    pub key: QuotaKey,
    allocation: u32,
    carried_over: u32,
    emergency_grant: u32,
    used: u32,
    reserved: u32,
    /// Zero until the record is first persisted; bumped on every mutation.
    pub version: u32,
    pub updated_at: DateTime<Utc>,
}

impl QuotaRecord {
    pub fn open(key: QuotaKey, allocation: u32, now: DateTime<Utc>) -> Self {
        Self {
            key,
            allocation,
            carried_over: 0,
            emergency_grant: 0,
            used: 0,
            reserved: 0,
            version: 0,
            updated_at: now,
        }
    }

    /// Rebuilds a record from storage. Rows that break the ledger invariant are refused.
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        key: QuotaKey,
        allocation: u32,
        carried_over: u32,
        emergency_grant: u32,
        used: u32,
        reserved: u32,
        version: u32,
        updated_at: DateTime<Utc>,
    ) -> Result<Self, LeaveError> {
        let record = Self {
            key,
            allocation,
            carried_over,
            emergency_grant,
            used,
            reserved,
            version,
            updated_at,
        };
        if u64::from(used) + u64::from(reserved) > u64::from(record.allocated()) {
            return Err(LeaveError::InvalidQuotaAdjustment {
                key: record.key.clone(),
                reason: format!(
                    "stored usage {used} + {reserved} exceeds allocation {}",
                    record.allocated()
                ),
            });
        }
        Ok(record)
    }

    pub fn allocation(&self) -> u32 {
        self.allocation
    }

    pub fn carried_over(&self) -> u32 {
        self.carried_over
    }

    pub fn emergency_grant(&self) -> u32 {
        self.emergency_grant
    }

    pub fn allocated(&self) -> u32 {
        self.allocation.saturating_add(self.carried_over).saturating_add(self.emergency_grant)
    }

    pub fn used(&self) -> u32 {
        self.used
    }

    pub fn reserved(&self) -> u32 {
        self.reserved
    }

    pub fn remaining(&self) -> u32 {
        self.allocated().saturating_sub(self.used).saturating_sub(self.reserved)
    }

    pub fn snapshot(&self) -> QuotaSnapshot {
        QuotaSnapshot {
            employee_id: self.key.employee_id.clone(),
            leave_type: self.key.leave_type.clone(),
            period: self.key.period,
            allocated: self.allocated(),
            used: self.used,
            reserved: self.reserved,
            remaining: self.remaining(),
        }
    }

    pub fn reserve(
        &mut self,
        request_id: &LeaveRequestId,
        units: u32,
        now: DateTime<Utc>,
    ) -> Result<Reservation, LeaveError> {
        let available = self.remaining();
        if units > available {
            return Err(LeaveError::InsufficientQuota {
                key: self.key.clone(),
                requested: units,
                available,
            });
        }

        self.reserved += units;
        self.touch(now);

        Ok(Reservation {
            id: ReservationId::generate(),
            key: self.key.clone(),
            request_id: request_id.clone(),
            units,
            state: ReservationState::Held,
            created_at: now,
            settled_at: None,
        })
    }

    pub fn commit(
        &mut self,
        reservation: &mut Reservation,
        now: DateTime<Utc>,
    ) -> Result<(), LeaveError> {
        self.ensure_held(reservation)?;

        self.reserved -= reservation.units;
        self.used += reservation.units;
        reservation.state = ReservationState::Committed;
        reservation.settled_at = Some(now);
        self.touch(now);
        Ok(())
    }

    pub fn release(
        &mut self,
        reservation: &mut Reservation,
        now: DateTime<Utc>,
    ) -> Result<(), LeaveError> {
        self.ensure_held(reservation)?;

        self.reserved -= reservation.units;
        reservation.state = ReservationState::Released;
        reservation.settled_at = Some(now);
        self.touch(now);
        Ok(())
    }

    pub fn adjust(
        &mut self,
        adjustment: QuotaAdjustment,
        now: DateTime<Utc>,
    ) -> Result<(), LeaveError> {
        let allocation = adjustment.allocation.unwrap_or(self.allocation);
        let carried_over = adjustment.carried_over.unwrap_or(self.carried_over);
        let emergency_grant = adjustment.emergency_grant.unwrap_or(self.emergency_grant);
        let total = u64::from(allocation) + u64::from(carried_over) + u64::from(emergency_grant);
        let committed = u64::from(self.used) + u64::from(self.reserved);

        if total > u64::from(u32::MAX) {
            return Err(LeaveError::InvalidQuotaAdjustment {
                key: self.key.clone(),
                reason: "allocated total overflows".to_string(),
            });
        }
        if total < committed {
            return Err(LeaveError::InvalidQuotaAdjustment {
                key: self.key.clone(),
                reason: format!(
                    "new total {total} is below used {} plus reserved {}",
                    self.used, self.reserved
                ),
            });
        }

        self.allocation = allocation;
        self.carried_over = carried_over;
        self.emergency_grant = emergency_grant;
        self.touch(now);
        Ok(())
    }

    fn ensure_held(&self, reservation: &Reservation) -> Result<(), LeaveError> {
        let settled = reservation.state != ReservationState::Held;
        let foreign = reservation.key != self.key;
        if settled || foreign || reservation.units > self.reserved {
            return Err(LeaveError::UnknownReservation(reservation.id.clone()));
        }
        Ok(())
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.version = self.version.saturating_add(1);
        self.updated_at = now;
    }
}
