use crate::{
    config::AppConfig,
    entities::{customer_address, CustomerAddress, CustomerAddressModel},
    errors::ServiceError,
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, ModelTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// Saved shipping addresses, capped per customer. Orders embed their own
/// address snapshot, so edits and deletions here never touch past orders.
#[derive(Clone)]
pub struct AddressService {
    db: Arc<DatabaseConnection>,
    config: Arc<AppConfig>,
}

#[derive(Debug, Clone)]
pub struct AddressInput {
    pub recipient: String,
    pub address: String,
    pub city: String,
    pub zipcode: String,
    pub phone: String,
    pub notes: Option<String>,
}

impl AddressService {
    pub fn new(db: Arc<DatabaseConnection>, config: Arc<AppConfig>) -> Self {
        Self { db, config }
    }

    pub async fn list(&self, customer_id: Uuid) -> Result<Vec<CustomerAddressModel>, ServiceError> {
        Ok(CustomerAddress::find()
            .filter(customer_address::Column::CustomerId.eq(customer_id))
            .order_by_asc(customer_address::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    #[instrument(skip(self, input))]
    pub async fn create(
        &self,
        customer_id: Uuid,
        input: AddressInput,
    ) -> Result<CustomerAddressModel, ServiceError> {
        let txn = self.db.begin().await?;

        let count = CustomerAddress::find()
            .filter(customer_address::Column::CustomerId.eq(customer_id))
            .count(&txn)
            .await?;
        if count >= self.config.max_addresses_per_customer {
            return Err(ServiceError::InvalidOperation(format!(
                "Address book is full (maximum {} addresses)",
                self.config.max_addresses_per_customer
            )));
        }

        let address = customer_address::ActiveModel {
            id: Set(Uuid::new_v4()),
            customer_id: Set(customer_id),
            recipient: Set(input.recipient),
            address: Set(input.address),
            city: Set(input.city),
            zipcode: Set(input.zipcode),
            phone: Set(input.phone),
            notes: Set(input.notes),
            created_at: Set(Utc::now()),
            updated_at: Set(Utc::now()),
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;
        Ok(address)
    }

    #[instrument(skip(self, input))]
    pub async fn update(
        &self,
        customer_id: Uuid,
        address_id: Uuid,
        input: AddressInput,
    ) -> Result<CustomerAddressModel, ServiceError> {
        let existing = self.find_owned(customer_id, address_id).await?;

        let mut active: customer_address::ActiveModel = existing.into();
        active.recipient = Set(input.recipient);
        active.address = Set(input.address);
        active.city = Set(input.city);
        active.zipcode = Set(input.zipcode);
        active.phone = Set(input.phone);
        active.notes = Set(input.notes);
        active.updated_at = Set(Utc::now());
        Ok(active.update(&*self.db).await?)
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, customer_id: Uuid, address_id: Uuid) -> Result<(), ServiceError> {
        let existing = self.find_owned(customer_id, address_id).await?;
        existing.delete(&*self.db).await?;
        Ok(())
    }

    pub async fn get(
        &self,
        customer_id: Uuid,
        address_id: Uuid,
    ) -> Result<CustomerAddressModel, ServiceError> {
        self.find_owned(customer_id, address_id).await
    }

    async fn find_owned(
        &self,
        customer_id: Uuid,
        address_id: Uuid,
    ) -> Result<CustomerAddressModel, ServiceError> {
        CustomerAddress::find_by_id(address_id)
            .filter(customer_address::Column::CustomerId.eq(customer_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Address {} not found", address_id)))
    }
}
