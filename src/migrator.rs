use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240101_000001_create_depots_table::Migration),
            Box::new(m20240101_000002_create_products_table::Migration),
            Box::new(m20240101_000003_create_members_table::Migration),
            Box::new(m20240101_000004_create_depot_product_variants_table::Migration),
            Box::new(m20240101_000005_create_orders_table::Migration),
            Box::new(m20240101_000006_create_order_items_table::Migration),
            Box::new(m20240101_000007_create_stock_ledger_table::Migration),
            Box::new(m20240101_000008_create_wallet_transactions_table::Migration),
            Box::new(m20240101_000009_create_sequence_counters_table::Migration),
        ]
    }
}

// Migration implementations

mod m20240101_000001_create_depots_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000001_create_depots_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Depots::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Depots::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Depots::Name).string().not_null())
                        .col(ColumnDef::new(Depots::Address).string().null())
                        .col(
                            ColumnDef::new(Depots::IsDefault)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(Depots::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Depots::UpdatedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Depots::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Depots {
        Table,
        Id,
        Name,
        Address,
        IsDefault,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240101_000002_create_products_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000002_create_products_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Products::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Products::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Products::Name).string().not_null())
                        .col(ColumnDef::new(Products::Unit).string().null())
                        .col(
                            ColumnDef::new(Products::Price)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Products::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Products::UpdatedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Products::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Products {
        Table,
        Id,
        Name,
        Unit,
        Price,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240101_000003_create_members_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000003_create_members_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Members::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Members::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Members::Name).string().not_null())
                        .col(ColumnDef::new(Members::Mobile).string().not_null())
                        .col(ColumnDef::new(Members::Email).string().null())
                        .col(
                            ColumnDef::new(Members::WalletBalance)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Members::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Members::UpdatedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Members::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Members {
        Table,
        Id,
        Name,
        Mobile,
        Email,
        WalletBalance,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240101_000004_create_depot_product_variants_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000004_create_depot_product_variants_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(DepotProductVariants::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(DepotProductVariants::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(DepotProductVariants::DepotId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(DepotProductVariants::ProductId)
                                .uuid()
                                .not_null(),
                        )
                        .col(ColumnDef::new(DepotProductVariants::Name).string().not_null())
                        .col(ColumnDef::new(DepotProductVariants::Unit).string().null())
                        .col(
                            ColumnDef::new(DepotProductVariants::Price)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(DepotProductVariants::ClosingQty)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(DepotProductVariants::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(DepotProductVariants::UpdatedAt)
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
                        .name("idx_depot_product_variants_depot_product")
                        .table(DepotProductVariants::Table)
                        .col(DepotProductVariants::DepotId)
                        .col(DepotProductVariants::ProductId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(DepotProductVariants::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum DepotProductVariants {
        Table,
        Id,
        DepotId,
        ProductId,
        Name,
        Unit,
        Price,
        ClosingQty,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240101_000005_create_orders_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000005_create_orders_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Orders::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Orders::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Orders::OrderNumber).string().not_null())
                        .col(ColumnDef::new(Orders::CustomerName).string().not_null())
                        .col(ColumnDef::new(Orders::CustomerMobile).string().not_null())
                        .col(ColumnDef::new(Orders::CustomerEmail).string().null())
                        .col(ColumnDef::new(Orders::AddressLine).string().not_null())
                        .col(ColumnDef::new(Orders::City).string().null())
                        .col(ColumnDef::new(Orders::Pincode).string().null())
                        .col(
                            ColumnDef::new(Orders::Subtotal)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Orders::DeliveryFee)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Orders::TotalAmount)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Orders::WalletAmountApplied)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Orders::PayableAmount)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Orders::PaymentStatus).string().not_null())
                        .col(ColumnDef::new(Orders::PaymentMode).string().null())
                        .col(ColumnDef::new(Orders::PaymentReference).string().null())
                        .col(
                            ColumnDef::new(Orders::PaymentDate)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(ColumnDef::new(Orders::DepotId).uuid().null())
                        .col(ColumnDef::new(Orders::MemberId).uuid().null())
                        .col(ColumnDef::new(Orders::InvoiceNo).string().null())
                        .col(ColumnDef::new(Orders::InvoicePath).string().null())
                        .col(
                            ColumnDef::new(Orders::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::UpdatedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .to_owned(),
                )
                .await?;

            // Order numbers are allocated transactionally; the unique index
            // is the backstop that turns an allocator bug into a loud
            // conflict instead of a silent duplicate.
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_order_number")
                        .table(Orders::Table)
                        .col(Orders::OrderNumber)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_member_id")
                        .table(Orders::Table)
                        .col(Orders::MemberId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_created_at")
                        .table(Orders::Table)
                        .col(Orders::CreatedAt)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Orders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Orders {
        Table,
        Id,
        OrderNumber,
        CustomerName,
        CustomerMobile,
        CustomerEmail,
        AddressLine,
        City,
        Pincode,
        Subtotal,
        DeliveryFee,
        TotalAmount,
        WalletAmountApplied,
        PayableAmount,
        PaymentStatus,
        PaymentMode,
        PaymentReference,
        PaymentDate,
        DepotId,
        MemberId,
        InvoiceNo,
        InvoicePath,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240101_000006_create_order_items_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000006_create_order_items_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(OrderItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(OrderItems::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(OrderItems::OrderId).uuid().not_null())
                        .col(ColumnDef::new(OrderItems::ProductId).uuid().null())
                        .col(ColumnDef::new(OrderItems::VariantId).uuid().null())
                        .col(ColumnDef::new(OrderItems::Name).string().not_null())
                        .col(ColumnDef::new(OrderItems::VariantName).string().null())
                        .col(
                            ColumnDef::new(OrderItems::Price)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(OrderItems::Quantity)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(OrderItems::LineTotal)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(OrderItems::IsCancelled)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(OrderItems::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(OrderItems::UpdatedAt)
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
                        .name("idx_order_items_order_id")
                        .table(OrderItems::Table)
                        .col(OrderItems::OrderId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(OrderItems::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum OrderItems {
        Table,
        Id,
        OrderId,
        ProductId,
        VariantId,
        Name,
        VariantName,
        Price,
        Quantity,
        LineTotal,
        IsCancelled,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240101_000007_create_stock_ledger_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000007_create_stock_ledger_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(StockLedger::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(StockLedger::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(StockLedger::ProductId).uuid().not_null())
                        .col(ColumnDef::new(StockLedger::VariantId).uuid().not_null())
                        .col(ColumnDef::new(StockLedger::DepotId).uuid().not_null())
                        .col(
                            ColumnDef::new(StockLedger::TransactionDate)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockLedger::ReceivedQty)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(StockLedger::IssuedQty)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(StockLedger::Module).string().not_null())
                        .col(ColumnDef::new(StockLedger::ForeignKey).uuid().null())
                        .col(
                            ColumnDef::new(StockLedger::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_stock_ledger_tuple")
                        .table(StockLedger::Table)
                        .col(StockLedger::ProductId)
                        .col(StockLedger::VariantId)
                        .col(StockLedger::DepotId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_stock_ledger_foreign_key")
                        .table(StockLedger::Table)
                        .col(StockLedger::ForeignKey)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(StockLedger::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum StockLedger {
        Table,
        Id,
        ProductId,
        VariantId,
        DepotId,
        TransactionDate,
        ReceivedQty,
        IssuedQty,
        Module,
        ForeignKey,
        CreatedAt,
    }
}

mod m20240101_000008_create_wallet_transactions_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000008_create_wallet_transactions_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(WalletTransactions::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(WalletTransactions::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(WalletTransactions::MemberId).uuid().not_null())
                        .col(
                            ColumnDef::new(WalletTransactions::Amount)
                                .decimal()
                                .not_null(),
                        )
                        .col(ColumnDef::new(WalletTransactions::TxnType).string().not_null())
                        .col(ColumnDef::new(WalletTransactions::Status).string().not_null())
                        .col(
                            ColumnDef::new(WalletTransactions::PaymentMethod)
                                .string()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(WalletTransactions::ReferenceNumber)
                                .string()
                                .null(),
                        )
                        .col(ColumnDef::new(WalletTransactions::Notes).string().null())
                        .col(ColumnDef::new(WalletTransactions::ProcessedBy).uuid().null())
                        .col(
                            ColumnDef::new(WalletTransactions::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_wallet_transactions_member_id")
                        .table(WalletTransactions::Table)
                        .col(WalletTransactions::MemberId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(WalletTransactions::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum WalletTransactions {
        Table,
        Id,
        MemberId,
        Amount,
        TxnType,
        Status,
        PaymentMethod,
        ReferenceNumber,
        Notes,
        ProcessedBy,
        CreatedAt,
    }
}

mod m20240101_000009_create_sequence_counters_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000009_create_sequence_counters_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(SequenceCounters::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(SequenceCounters::CounterKey)
                                .string()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(SequenceCounters::Scope).string().not_null())
                        .col(ColumnDef::new(SequenceCounters::Bucket).string().not_null())
                        .col(
                            ColumnDef::new(SequenceCounters::Value)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(SequenceCounters::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(SequenceCounters::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum SequenceCounters {
        Table,
        CounterKey,
        Scope,
        Bucket,
        Value,
        UpdatedAt,
    }
}
