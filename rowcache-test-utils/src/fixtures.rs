//! Fixture entity types
//!
//! - [`User`]: auto-generated key, a bool, a nullable text and a read-only
//!   timestamp
//! - [`Customer`] / [`Order`]: the two sides of a relation load
//! - [`Tag`]: composite key without an auto-generated column
//! - [`AuditEntry`]: no key columns, so its cache item is read-only

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use rowcache_core::{unknown_field, ColumnDef, Entity, EntitySchema, FieldType, SqlValue, ValueError};

// ============================================================================
// USER
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub active: bool,
    pub email: Option<String>,
    pub created: Option<DateTime<Utc>>,
}

static USER_SCHEMA: Lazy<EntitySchema> = Lazy::new(|| {
    EntitySchema::builder("User")
        .table("Users")
        .column(ColumnDef::new("Id", FieldType::Int).key().auto_generated())
        .column(ColumnDef::new("Name", FieldType::Text))
        .column(ColumnDef::new("Active", FieldType::Bool))
        .column(ColumnDef::new("Email", FieldType::Text))
        .column(ColumnDef::new("Created", FieldType::Timestamp).read_only())
        .build()
});

impl User {
    /// Unsaved user with just a name.
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            active: true,
            ..Self::default()
        }
    }
}

impl Entity for User {
    fn schema() -> &'static EntitySchema {
        &USER_SCHEMA
    }

    fn get(&self, column: &str) -> Option<SqlValue> {
        match column {
            "Id" => Some(self.id.into()),
            "Name" => Some(self.name.clone().into()),
            "Active" => Some(self.active.into()),
            "Email" => Some(self.email.clone().into()),
            "Created" => Some(self.created.into()),
            _ => None,
        }
    }

    fn set(&mut self, column: &str, value: SqlValue) -> Result<(), ValueError> {
        match column {
            "Id" => self.id = value.decode()?,
            "Name" => self.name = value.decode()?,
            "Active" => self.active = value.decode()?,
            "Email" => self.email = value.decode()?,
            "Created" => self.created = value.decode()?,
            _ => return Err(unknown_field::<Self>(column)),
        }
        Ok(())
    }
}

// ============================================================================
// CUSTOMER / ORDER
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Customer {
    pub id: i64,
    pub name: String,
    pub vip: bool,
}

static CUSTOMER_SCHEMA: Lazy<EntitySchema> = Lazy::new(|| {
    EntitySchema::builder("Customer")
        .table("Customers")
        .column(ColumnDef::new("Id", FieldType::Int).key().auto_generated())
        .column(ColumnDef::new("Name", FieldType::Text))
        .column(ColumnDef::new("Vip", FieldType::Bool))
        .build()
});

impl Entity for Customer {
    fn schema() -> &'static EntitySchema {
        &CUSTOMER_SCHEMA
    }

    fn get(&self, column: &str) -> Option<SqlValue> {
        match column {
            "Id" => Some(self.id.into()),
            "Name" => Some(self.name.clone().into()),
            "Vip" => Some(self.vip.into()),
            _ => None,
        }
    }

    fn set(&mut self, column: &str, value: SqlValue) -> Result<(), ValueError> {
        match column {
            "Id" => self.id = value.decode()?,
            "Name" => self.name = value.decode()?,
            "Vip" => self.vip = value.decode()?,
            _ => return Err(unknown_field::<Self>(column)),
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Order {
    pub id: i64,
    pub customer_id: i64,
    pub total: f64,
    pub note: Option<String>,
}

static ORDER_SCHEMA: Lazy<EntitySchema> = Lazy::new(|| {
    EntitySchema::builder("Order")
        .table("Orders")
        .column(ColumnDef::new("Id", FieldType::Int).key().auto_generated())
        .column(ColumnDef::new("CustomerId", FieldType::Int))
        .column(ColumnDef::new("Total", FieldType::Float))
        .column(ColumnDef::new("Note", FieldType::Text))
        .build()
});

impl Entity for Order {
    fn schema() -> &'static EntitySchema {
        &ORDER_SCHEMA
    }

    fn get(&self, column: &str) -> Option<SqlValue> {
        match column {
            "Id" => Some(self.id.into()),
            "CustomerId" => Some(self.customer_id.into()),
            "Total" => Some(self.total.into()),
            "Note" => Some(self.note.clone().into()),
            _ => None,
        }
    }

    fn set(&mut self, column: &str, value: SqlValue) -> Result<(), ValueError> {
        match column {
            "Id" => self.id = value.decode()?,
            "CustomerId" => self.customer_id = value.decode()?,
            "Total" => self.total = value.decode()?,
            "Note" => self.note = value.decode()?,
            _ => return Err(unknown_field::<Self>(column)),
        }
        Ok(())
    }
}

// ============================================================================
// TAG (composite key)
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tag {
    pub owner: i64,
    pub label: String,
    pub color: Option<String>,
}

static TAG_SCHEMA: Lazy<EntitySchema> = Lazy::new(|| {
    EntitySchema::builder("Tag")
        .table("Tags")
        .column(ColumnDef::new("Owner", FieldType::Int).key())
        .column(ColumnDef::new("Label", FieldType::Text).key())
        .column(ColumnDef::new("Color", FieldType::Text))
        .build()
});

impl Entity for Tag {
    fn schema() -> &'static EntitySchema {
        &TAG_SCHEMA
    }

    fn get(&self, column: &str) -> Option<SqlValue> {
        match column {
            "Owner" => Some(self.owner.into()),
            "Label" => Some(self.label.clone().into()),
            "Color" => Some(self.color.clone().into()),
            _ => None,
        }
    }

    fn set(&mut self, column: &str, value: SqlValue) -> Result<(), ValueError> {
        match column {
            "Owner" => self.owner = value.decode()?,
            "Label" => self.label = value.decode()?,
            "Color" => self.color = value.decode()?,
            _ => return Err(unknown_field::<Self>(column)),
        }
        Ok(())
    }
}

// ============================================================================
// AUDIT ENTRY (no keys)
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditEntry {
    pub message: String,
    pub level: i64,
}

static AUDIT_SCHEMA: Lazy<EntitySchema> = Lazy::new(|| {
    EntitySchema::builder("AuditEntry")
        .table("AuditLog")
        .column(ColumnDef::new("Message", FieldType::Text))
        .column(ColumnDef::new("Level", FieldType::Int))
        .build()
});

impl Entity for AuditEntry {
    fn schema() -> &'static EntitySchema {
        &AUDIT_SCHEMA
    }

    fn get(&self, column: &str) -> Option<SqlValue> {
        match column {
            "Message" => Some(self.message.clone().into()),
            "Level" => Some(self.level.into()),
            _ => None,
        }
    }

    fn set(&mut self, column: &str, value: SqlValue) -> Result<(), ValueError> {
        match column {
            "Message" => self.message = value.decode()?,
            "Level" => self.level = value.decode()?,
            _ => return Err(unknown_field::<Self>(column)),
        }
        Ok(())
    }
}

// ============================================================================
// BROKEN SCHEMAS (construction-time errors)
// ============================================================================

/// Declares two auto-generated columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DoubleIdentity {
    pub a: i64,
    pub b: i64,
}

static DOUBLE_IDENTITY_SCHEMA: Lazy<EntitySchema> = Lazy::new(|| {
    EntitySchema::builder("DoubleIdentity")
        .column(ColumnDef::new("A", FieldType::Int).key().auto_generated())
        .column(ColumnDef::new("B", FieldType::Int).auto_generated())
        .build()
});

impl Entity for DoubleIdentity {
    fn schema() -> &'static EntitySchema {
        &DOUBLE_IDENTITY_SCHEMA
    }

    fn get(&self, column: &str) -> Option<SqlValue> {
        match column {
            "A" => Some(self.a.into()),
            "B" => Some(self.b.into()),
            _ => None,
        }
    }

    fn set(&mut self, column: &str, value: SqlValue) -> Result<(), ValueError> {
        match column {
            "A" => self.a = value.decode()?,
            "B" => self.b = value.decode()?,
            _ => return Err(unknown_field::<Self>(column)),
        }
        Ok(())
    }
}

/// Declares no columns and an empty table name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Hollow;

static HOLLOW_SCHEMA: Lazy<EntitySchema> =
    Lazy::new(|| EntitySchema::builder("Hollow").table("").build());

impl Entity for Hollow {
    fn schema() -> &'static EntitySchema {
        &HOLLOW_SCHEMA
    }

    fn get(&self, _column: &str) -> Option<SqlValue> {
        None
    }

    fn set(&mut self, column: &str, _value: SqlValue) -> Result<(), ValueError> {
        Err(unknown_field::<Self>(column))
    }
}
