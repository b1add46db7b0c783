use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// all events that can be emitted by the interpreter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DealEvent {
    // covenant events
    BreachRecorded {
        covenant: String,
        breach_date: NaiveDate,
        cure_deadline: NaiveDate,
    },
    CureApplied {
        covenant: String,
        mechanism: String,
        amount: Decimal,
        uses_remaining: Option<u32>,
        timestamp: DateTime<Utc>,
    },

    // basket events
    BasketUsed {
        basket: String,
        amount: Decimal,
        remaining: Decimal,
        description: String,
        timestamp: DateTime<Utc>,
    },
    BasketAccumulated {
        basket: String,
        amount: Decimal,
        total_accumulated: Decimal,
        timestamp: DateTime<Utc>,
    },

    // phase events
    PhaseEntered {
        phase: String,
        triggered_by: Option<String>,
        timestamp: DateTime<Utc>,
    },
    ConditionSatisfied {
        name: String,
        timestamp: DateTime<Utc>,
    },

    // milestone events
    MilestoneAchieved {
        milestone: String,
        date: NaiveDate,
        triggers_fired: Vec<String>,
    },
    RegulatoryStatusChanged {
        requirement: String,
        old_status: String,
        new_status: String,
    },
    CpStatusChanged {
        checklist: String,
        item: String,
        status: String,
    },

    // cash events
    ReserveFunded {
        reserve: String,
        amount: Decimal,
        new_balance: Decimal,
        timestamp: DateTime<Utc>,
    },
    ReserveDrawn {
        reserve: String,
        amount: Decimal,
        new_balance: Decimal,
        timestamp: DateTime<Utc>,
    },
    WaterfallExecuted {
        waterfall: String,
        revenue: Decimal,
        distributed: Decimal,
        remainder: Decimal,
        timestamp: DateTime<Utc>,
    },

    // structural events
    AmendmentApplied {
        number: u32,
        effective: NaiveDate,
        description: String,
        timestamp: DateTime<Utc>,
    },
    FlipTriggered {
        flip: String,
        date: NaiveDate,
    },
    EventOfDefaultSet {
        event: String,
        timestamp: DateTime<Utc>,
    },
    EventOfDefaultCleared {
        event: String,
        timestamp: DateTime<Utc>,
    },
}

/// event store for collecting events during operations
#[derive(Debug, Default)]
pub struct EventStore {
    events: Vec<DealEvent>,
}

impl EventStore {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn emit(&mut self, event: DealEvent) {
        self.events.push(event);
    }

    pub fn take_events(&mut self) -> Vec<DealEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn events(&self) -> &[DealEvent] {
        &self.events
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}
