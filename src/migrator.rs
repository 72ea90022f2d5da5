use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240601_000001_create_cart_tables::Migration),
            Box::new(m20240601_000002_create_tax_and_promo_tables::Migration),
            Box::new(m20240601_000003_create_payment_and_booking_tables::Migration),
            Box::new(m20240601_000004_create_outbox_events_table::Migration),
        ]
    }
}

fn money(col: impl IntoIden) -> ColumnDef {
    ColumnDef::new(col)
        .decimal_len(19, 4)
        .not_null()
        .default(0)
        .to_owned()
}

fn created_at(col: impl IntoIden) -> ColumnDef {
    ColumnDef::new(col)
        .timestamp_with_time_zone()
        .not_null()
        .to_owned()
}

mod m20240601_000001_create_cart_tables {
    use super::{created_at, money};
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000001_create_cart_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(CatalogItems::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(CatalogItems::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(CatalogItems::ServiceId).uuid().not_null())
                        .col(ColumnDef::new(CatalogItems::Name).string().not_null())
                        .col(&mut money(CatalogItems::Price))
                        .col(
                            ColumnDef::new(CatalogItems::IsActive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(&mut created_at(CatalogItems::CreatedAt))
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Carts::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Carts::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Carts::UserId).uuid().not_null())
                        .col(ColumnDef::new(Carts::ServiceId).uuid().not_null())
                        .col(ColumnDef::new(Carts::ServiceVariantId).uuid().not_null())
                        .col(ColumnDef::new(Carts::VendorId).uuid().null())
                        .col(ColumnDef::new(Carts::BookingDate).date().null())
                        .col(ColumnDef::new(Carts::BookingTime).time().null())
                        .col(ColumnDef::new(Carts::Notes).text().null())
                        .col(ColumnDef::new(Carts::MediaUrl).string().null())
                        .col(ColumnDef::new(Carts::PromoId).uuid().null())
                        .col(
                            ColumnDef::new(Carts::Status)
                                .string_len(20)
                                .not_null()
                                .default("active"),
                        )
                        .col(&mut created_at(Carts::CreatedAt))
                        .col(&mut created_at(Carts::UpdatedAt))
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_carts_user_service_variant")
                        .table(Carts::Table)
                        .col(Carts::UserId)
                        .col(Carts::ServiceId)
                        .col(Carts::ServiceVariantId)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(CartLineItems::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(CartLineItems::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(CartLineItems::CartId).uuid().not_null())
                        .col(ColumnDef::new(CartLineItems::CatalogItemId).uuid().not_null())
                        .col(ColumnDef::new(CartLineItems::Name).string().not_null())
                        .col(&mut money(CartLineItems::UnitPrice))
                        .col(ColumnDef::new(CartLineItems::Quantity).integer().not_null())
                        .col(&mut created_at(CartLineItems::CreatedAt))
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_cart_line_items_cart")
                                .from(CartLineItems::Table, CartLineItems::CartId)
                                .to(Carts::Table, Carts::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_cart_line_items_cart_id")
                        .table(CartLineItems::Table)
                        .col(CartLineItems::CartId)
                        .to_owned(),
                )
                .await?;

            for (table, extra) in [
                (CartOptions::CartAddons, None),
                (CartOptions::CartPreferences, Some(CartOptions::Value)),
                (CartOptions::CartConsents, Some(CartOptions::Accepted)),
            ] {
                let mut create = Table::create();
                create
                    .table(table)
                    .if_not_exists()
                    .col(ColumnDef::new(CartOptions::Id).uuid().primary_key().not_null())
                    .col(ColumnDef::new(CartOptions::CartId).uuid().not_null())
                    .col(ColumnDef::new(CartOptions::LineItemId).uuid().not_null())
                    .col(ColumnDef::new(CartOptions::Name).string().not_null())
                    .col(&mut money(CartOptions::Price))
                    .col(&mut money(CartOptions::TotalPrice))
                    .foreign_key(
                        ForeignKey::create()
                            .from(table, CartOptions::LineItemId)
                            .to(CartLineItems::Table, CartLineItems::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    );
                match extra {
                    Some(CartOptions::Value) => {
                        create.col(ColumnDef::new(CartOptions::Value).string().null());
                    }
                    Some(CartOptions::Accepted) => {
                        create.col(
                            ColumnDef::new(CartOptions::Accepted)
                                .boolean()
                                .not_null()
                                .default(true),
                        );
                    }
                    _ => {}
                }
                manager.create_table(create.to_owned()).await?;

                manager
                    .create_index(
                        Index::create()
                            .if_not_exists()
                            .name(format!("idx_{}_cart_id", table.to_string()))
                            .table(table)
                            .col(CartOptions::CartId)
                            .to_owned(),
                    )
                    .await?;
            }

            manager
                .create_table(
                    Table::create()
                        .table(CartTotals::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(CartTotals::CartId).uuid().primary_key().not_null())
                        .col(&mut money(CartTotals::Subtotal))
                        .col(&mut money(CartTotals::PromoDiscount))
                        .col(&mut money(CartTotals::DiscountedTotal))
                        .col(ColumnDef::new(CartTotals::TaxName).string().not_null())
                        .col(
                            ColumnDef::new(CartTotals::TaxPercentage)
                                .decimal_len(9, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(&mut money(CartTotals::TaxAmount))
                        .col(&mut money(CartTotals::FinalTotal))
                        .col(ColumnDef::new(CartTotals::PromoId).uuid().null())
                        .col(ColumnDef::new(CartTotals::PromoCode).string().null())
                        .col(&mut created_at(CartTotals::CalculatedAt))
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_cart_totals_cart")
                                .from(CartTotals::Table, CartTotals::CartId)
                                .to(Carts::Table, Carts::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(CartTotals::Table).to_owned())
                .await?;
            for table in [
                CartOptions::CartConsents,
                CartOptions::CartPreferences,
                CartOptions::CartAddons,
            ] {
                manager
                    .drop_table(Table::drop().table(table).to_owned())
                    .await?;
            }
            manager
                .drop_table(Table::drop().table(CartLineItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Carts::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(CatalogItems::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum CatalogItems {
        Table,
        Id,
        ServiceId,
        Name,
        Price,
        IsActive,
        CreatedAt,
    }

    #[derive(DeriveIden)]
    enum Carts {
        Table,
        Id,
        UserId,
        ServiceId,
        ServiceVariantId,
        VendorId,
        BookingDate,
        BookingTime,
        Notes,
        MediaUrl,
        PromoId,
        Status,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum CartLineItems {
        Table,
        Id,
        CartId,
        CatalogItemId,
        Name,
        UnitPrice,
        Quantity,
        CreatedAt,
    }

    /// Shared column set of the add-on, preference and consent tables
    #[derive(DeriveIden, Clone, Copy)]
    enum CartOptions {
        CartAddons,
        CartPreferences,
        CartConsents,
        Id,
        CartId,
        LineItemId,
        Name,
        Value,
        Accepted,
        Price,
        TotalPrice,
    }

    #[derive(DeriveIden)]
    enum CartTotals {
        Table,
        CartId,
        Subtotal,
        PromoDiscount,
        DiscountedTotal,
        TaxName,
        TaxPercentage,
        TaxAmount,
        FinalTotal,
        PromoId,
        PromoCode,
        CalculatedAt,
    }
}

mod m20240601_000002_create_tax_and_promo_tables {
    use super::{created_at, money};
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000002_create_tax_and_promo_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(TaxConfigs::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(TaxConfigs::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(TaxConfigs::Name).string().not_null())
                        .col(
                            ColumnDef::new(TaxConfigs::Percentage)
                                .decimal_len(9, 4)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(TaxConfigs::IsActive)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(&mut created_at(TaxConfigs::CreatedAt))
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(AdminPromos::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(AdminPromos::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(AdminPromos::UserId).uuid().not_null())
                        .col(ColumnDef::new(AdminPromos::Code).string().not_null())
                        .col(
                            ColumnDef::new(AdminPromos::DiscountType)
                                .string_len(16)
                                .not_null(),
                        )
                        .col(&mut money(AdminPromos::DiscountValue))
                        .col(&mut money(AdminPromos::MinSpend))
                        .col(ColumnDef::new(AdminPromos::MaxUse).integer().not_null())
                        .col(
                            ColumnDef::new(AdminPromos::UsedCount)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(&mut created_at(AdminPromos::StartDate))
                        .col(&mut created_at(AdminPromos::EndDate))
                        .col(&mut created_at(AdminPromos::CreatedAt))
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_admin_promos_user_id")
                        .table(AdminPromos::Table)
                        .col(AdminPromos::UserId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(SystemPromos::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(SystemPromos::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(SystemPromos::Code).string().not_null())
                        .col(
                            ColumnDef::new(SystemPromos::DiscountType)
                                .string_len(16)
                                .not_null(),
                        )
                        .col(&mut money(SystemPromos::DiscountValue))
                        .col(&mut money(SystemPromos::MinSpend))
                        .col(
                            ColumnDef::new(SystemPromos::MaxUsePerUser)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(SystemPromos::IsActive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(&mut created_at(SystemPromos::CreatedAt))
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(SystemPromoUsages::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(SystemPromoUsages::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(SystemPromoUsages::SystemPromoId)
                                .uuid()
                                .not_null(),
                        )
                        .col(ColumnDef::new(SystemPromoUsages::UserId).uuid().not_null())
                        .col(
                            ColumnDef::new(SystemPromoUsages::UsedCount)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(&mut created_at(SystemPromoUsages::UpdatedAt))
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_system_promo_usages_promo")
                                .from(SystemPromoUsages::Table, SystemPromoUsages::SystemPromoId)
                                .to(SystemPromos::Table, SystemPromos::Id),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_system_promo_usages_promo_user")
                        .table(SystemPromoUsages::Table)
                        .col(SystemPromoUsages::SystemPromoId)
                        .col(SystemPromoUsages::UserId)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(SystemPromoUsages::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(SystemPromos::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(AdminPromos::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(TaxConfigs::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum TaxConfigs {
        Table,
        Id,
        Name,
        Percentage,
        IsActive,
        CreatedAt,
    }

    #[derive(DeriveIden)]
    enum AdminPromos {
        Table,
        Id,
        UserId,
        Code,
        DiscountType,
        DiscountValue,
        MinSpend,
        MaxUse,
        UsedCount,
        StartDate,
        EndDate,
        CreatedAt,
    }

    #[derive(DeriveIden)]
    enum SystemPromos {
        Table,
        Id,
        Code,
        DiscountType,
        DiscountValue,
        MinSpend,
        MaxUsePerUser,
        IsActive,
        CreatedAt,
    }

    #[derive(DeriveIden)]
    enum SystemPromoUsages {
        Table,
        Id,
        SystemPromoId,
        UserId,
        UsedCount,
        UpdatedAt,
    }
}

mod m20240601_000003_create_payment_and_booking_tables {
    use super::{created_at, money};
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000003_create_payment_and_booking_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(PaymentIntents::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(PaymentIntents::Id).uuid().primary_key().not_null())
                        .col(
                            ColumnDef::new(PaymentIntents::ExternalId)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(PaymentIntents::CartId).uuid().null())
                        .col(ColumnDef::new(PaymentIntents::UserId).uuid().null())
                        .col(ColumnDef::new(PaymentIntents::Amount).big_integer().not_null())
                        .col(ColumnDef::new(PaymentIntents::Currency).string_len(3).not_null())
                        .col(ColumnDef::new(PaymentIntents::Status).string_len(48).not_null())
                        .col(ColumnDef::new(PaymentIntents::ReceiptReference).string().null())
                        .col(ColumnDef::new(PaymentIntents::Note).text().null())
                        .col(ColumnDef::new(PaymentIntents::Metadata).json().null())
                        .col(&mut created_at(PaymentIntents::CreatedAt))
                        .col(&mut created_at(PaymentIntents::UpdatedAt))
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_payment_intents_status")
                        .table(PaymentIntents::Table)
                        .col(PaymentIntents::Status)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Bookings::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Bookings::Id).uuid().primary_key().not_null())
                        .col(
                            ColumnDef::new(Bookings::PaymentIntentId)
                                .uuid()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Bookings::UserId).uuid().not_null())
                        .col(ColumnDef::new(Bookings::ServiceId).uuid().not_null())
                        .col(ColumnDef::new(Bookings::ServiceVariantId).uuid().not_null())
                        .col(ColumnDef::new(Bookings::VendorId).uuid().null())
                        .col(ColumnDef::new(Bookings::BookingDate).date().not_null())
                        .col(ColumnDef::new(Bookings::BookingTime).time().not_null())
                        .col(ColumnDef::new(Bookings::Notes).text().null())
                        .col(ColumnDef::new(Bookings::MediaUrl).string().null())
                        .col(ColumnDef::new(Bookings::PromoId).uuid().null())
                        .col(ColumnDef::new(Bookings::PaymentStatus).string_len(20).not_null())
                        .col(ColumnDef::new(Bookings::BookingStatus).string_len(20).not_null())
                        .col(&mut created_at(Bookings::CreatedAt))
                        .col(&mut created_at(Bookings::UpdatedAt))
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_bookings_payment_intent")
                                .from(Bookings::Table, Bookings::PaymentIntentId)
                                .to(PaymentIntents::Table, PaymentIntents::Id),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_bookings_user_id")
                        .table(Bookings::Table)
                        .col(Bookings::UserId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(BookingLineItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(BookingLineItems::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(BookingLineItems::BookingId).uuid().not_null())
                        .col(
                            ColumnDef::new(BookingLineItems::CatalogItemId)
                                .uuid()
                                .not_null(),
                        )
                        .col(ColumnDef::new(BookingLineItems::Name).string().not_null())
                        .col(&mut money(BookingLineItems::UnitPrice))
                        .col(ColumnDef::new(BookingLineItems::Quantity).integer().not_null())
                        .col(&mut created_at(BookingLineItems::CreatedAt))
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_booking_line_items_booking")
                                .from(BookingLineItems::Table, BookingLineItems::BookingId)
                                .to(Bookings::Table, Bookings::Id),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_booking_line_items_booking_id")
                        .table(BookingLineItems::Table)
                        .col(BookingLineItems::BookingId)
                        .to_owned(),
                )
                .await?;

            for (table, extra) in [
                (BookingOptions::BookingAddons, None),
                (BookingOptions::BookingPreferences, Some(BookingOptions::Value)),
                (BookingOptions::BookingConsents, Some(BookingOptions::Accepted)),
            ] {
                let mut create = Table::create();
                create
                    .table(table)
                    .if_not_exists()
                    .col(ColumnDef::new(BookingOptions::Id).uuid().primary_key().not_null())
                    .col(ColumnDef::new(BookingOptions::BookingId).uuid().not_null())
                    .col(
                        ColumnDef::new(BookingOptions::BookingLineItemId)
                            .uuid()
                            .not_null(),
                    )
                    .col(ColumnDef::new(BookingOptions::Name).string().not_null())
                    .col(&mut money(BookingOptions::Price))
                    .col(&mut money(BookingOptions::TotalPrice))
                    .foreign_key(
                        ForeignKey::create()
                            .from(table, BookingOptions::BookingLineItemId)
                            .to(BookingLineItems::Table, BookingLineItems::Id),
                    );
                match extra {
                    Some(BookingOptions::Value) => {
                        create.col(ColumnDef::new(BookingOptions::Value).string().null());
                    }
                    Some(BookingOptions::Accepted) => {
                        create.col(
                            ColumnDef::new(BookingOptions::Accepted)
                                .boolean()
                                .not_null()
                                .default(true),
                        );
                    }
                    _ => {}
                }
                manager.create_table(create.to_owned()).await?;

                manager
                    .create_index(
                        Index::create()
                            .if_not_exists()
                            .name(format!("idx_{}_booking_id", table.to_string()))
                            .table(table)
                            .col(BookingOptions::BookingId)
                            .to_owned(),
                    )
                    .await?;
            }

            manager
                .create_table(
                    Table::create()
                        .table(BookingTotals::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(BookingTotals::BookingId)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(&mut money(BookingTotals::Subtotal))
                        .col(&mut money(BookingTotals::PromoDiscount))
                        .col(&mut money(BookingTotals::DiscountedTotal))
                        .col(ColumnDef::new(BookingTotals::TaxName).string().not_null())
                        .col(
                            ColumnDef::new(BookingTotals::TaxPercentage)
                                .decimal_len(9, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(&mut money(BookingTotals::TaxAmount))
                        .col(&mut money(BookingTotals::FinalTotal))
                        .col(ColumnDef::new(BookingTotals::PromoCode).string().null())
                        .col(&mut created_at(BookingTotals::CalculatedAt))
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_booking_totals_booking")
                                .from(BookingTotals::Table, BookingTotals::BookingId)
                                .to(Bookings::Table, Bookings::Id),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(BookingTotals::Table).to_owned())
                .await?;
            for table in [
                BookingOptions::BookingConsents,
                BookingOptions::BookingPreferences,
                BookingOptions::BookingAddons,
            ] {
                manager
                    .drop_table(Table::drop().table(table).to_owned())
                    .await?;
            }
            manager
                .drop_table(Table::drop().table(BookingLineItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Bookings::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(PaymentIntents::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum PaymentIntents {
        Table,
        Id,
        ExternalId,
        CartId,
        UserId,
        Amount,
        Currency,
        Status,
        ReceiptReference,
        Note,
        Metadata,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum Bookings {
        Table,
        Id,
        PaymentIntentId,
        UserId,
        ServiceId,
        ServiceVariantId,
        VendorId,
        BookingDate,
        BookingTime,
        Notes,
        MediaUrl,
        PromoId,
        PaymentStatus,
        BookingStatus,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum BookingLineItems {
        Table,
        Id,
        BookingId,
        CatalogItemId,
        Name,
        UnitPrice,
        Quantity,
        CreatedAt,
    }

    #[derive(DeriveIden, Clone, Copy)]
    enum BookingOptions {
        BookingAddons,
        BookingPreferences,
        BookingConsents,
        Id,
        BookingId,
        BookingLineItemId,
        Name,
        Value,
        Accepted,
        Price,
        TotalPrice,
    }

    #[derive(DeriveIden)]
    enum BookingTotals {
        Table,
        BookingId,
        Subtotal,
        PromoDiscount,
        DiscountedTotal,
        TaxName,
        TaxPercentage,
        TaxAmount,
        FinalTotal,
        PromoCode,
        CalculatedAt,
    }
}

mod m20240601_000004_create_outbox_events_table {
    use super::created_at;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000004_create_outbox_events_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(OutboxEvents::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(OutboxEvents::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(OutboxEvents::AggregateType).string().not_null())
                        .col(ColumnDef::new(OutboxEvents::AggregateId).uuid().null())
                        .col(ColumnDef::new(OutboxEvents::EventType).string().not_null())
                        .col(ColumnDef::new(OutboxEvents::Payload).json().not_null())
                        .col(
                            ColumnDef::new(OutboxEvents::Status)
                                .string_len(16)
                                .not_null()
                                .default("pending"),
                        )
                        .col(
                            ColumnDef::new(OutboxEvents::Attempts)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(&mut created_at(OutboxEvents::AvailableAt))
                        .col(ColumnDef::new(OutboxEvents::ErrorMessage).text().null())
                        .col(&mut created_at(OutboxEvents::CreatedAt))
                        .col(&mut created_at(OutboxEvents::UpdatedAt))
                        .col(
                            ColumnDef::new(OutboxEvents::ProcessedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_outbox_events_status_available_at")
                        .table(OutboxEvents::Table)
                        .col(OutboxEvents::Status)
                        .col(OutboxEvents::AvailableAt)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(OutboxEvents::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum OutboxEvents {
        Table,
        Id,
        AggregateType,
        AggregateId,
        EventType,
        Payload,
        Status,
        Attempts,
        AvailableAt,
        ErrorMessage,
        CreatedAt,
        UpdatedAt,
        ProcessedAt,
    }
}
