//! Entity catalog: where each entity lives in the source database, how its
//! rows map onto destination records, and the order jobs run in.

use std::sync::Arc;

use sqlx::PgPool;

use crate::destination::client::DestinationClient;
use crate::destination::push::HttpPushService;
use tradesync_common::error::TradeSyncResult;
use tradesync_db::source::filters::BaseFilter;
use tradesync_db::source::models::{ChangeTimestamp, EntityKind, EntitySource};
use tradesync_db::source::pg_repository::PgSourceRepository;
use tradesync_sync::bulk::BulkJob;
use tradesync_sync::incremental::IncrementalJob;
use tradesync_sync::job::{JobKind, SyncJob};
use tradesync_sync::registry::JobRegistry;
use tradesync_sync::translate::RecordTranslator;
use tradesync_sync::uom::UomConversionCache;

/// Destination unit for volumes (US gallons).
pub const GALLONS: i64 = 3;

const TRADE_STATUSES: [(&str, &str); 3] = [("A", "Active"), ("C", "Closed"), ("H", "Hold")];
const RECEIPT_DELIVERY: [(&str, &str); 2] = [("R", "Receipt"), ("D", "Delivery")];
const PAYABLE_RECEIVABLE: [(&str, &str); 2] = [("P", "Payable"), ("R", "Receivable")];

/// One declared job.
pub struct CatalogEntry {
    pub name: &'static str,
    pub kind: JobKind,
    pub source: EntitySource,
    pub translator: RecordTranslator,
    /// Notify the destination after each pass.
    pub completes_pass: bool,
}

impl CatalogEntry {
    fn bulk(name: &'static str, source: EntitySource, translator: RecordTranslator) -> Self {
        Self {
            name,
            kind: JobKind::Bulk,
            source,
            translator,
            completes_pass: false,
        }
    }

    fn incremental(name: &'static str, source: EntitySource, translator: RecordTranslator) -> Self {
        Self {
            name,
            kind: JobKind::Incremental,
            source,
            translator,
            completes_pass: false,
        }
    }

    fn completing_pass(mut self) -> Self {
        self.completes_pass = true;
        self
    }

    fn job(&self, pool: &PgPool, client: &DestinationClient) -> Box<dyn SyncJob> {
        let fetcher = Arc::new(PgSourceRepository::new(pool.clone(), self.source.clone()));
        let translator = Arc::new(self.translator.clone());
        let mut push = HttpPushService::new(client.clone(), self.source.kind);
        if self.completes_pass {
            push = push.notifying_completion();
        }
        let push = Arc::new(push);

        match self.kind {
            JobKind::Bulk => Box::new(BulkJob::new(self.name, fetcher, translator, push)),
            JobKind::Incremental => Box::new(IncrementalJob::new(self.name, fetcher, translator, push)),
        }
    }
}

/// Every job in execution order: reference data first, then the
/// cursor-driven entities.
pub fn entries(uom: &Arc<UomConversionCache>) -> Vec<CatalogEntry> {
    let mut entries = bulk_entries();
    entries.extend(incremental_entries(uom));
    entries
}

fn bulk_entries() -> Vec<CatalogEntry> {
    use EntityKind::*;

    vec![
        CatalogEntry::bulk(
            "code_sets",
            EntitySource::new(CodeSet, "dynamiclistbox dlb", "dlb.dynlstbxid", "to_jsonb(dlb)"),
            RecordTranslator::new(CodeSet)
                .copy("dynlstbxqlfr", "codeSetName")
                .copy("dynlstbxtyp", "code")
                .copy("dynlstbxdesc", "meaning"),
        ),
        CatalogEntry::bulk(
            "currencies",
            EntitySource::new(Currency, "currency c", "c.crrncyid", "to_jsonb(c)"),
            RecordTranslator::new(Currency)
                .copy("crrncysmbl", "symbol")
                .copy("crrncynme", "name"),
        ),
        CatalogEntry::bulk(
            "units_of_measure",
            EntitySource::new(UnitOfMeasure, "unitofmeasure u", "u.uom", "to_jsonb(u)"),
            RecordTranslator::new(UnitOfMeasure)
                .copy("uomabbv", "abbreviation")
                .copy("uomdesc", "name")
                .copy("uomtpe", "unitType"),
        ),
        CatalogEntry::bulk(
            "products",
            EntitySource::new(Product, "product p", "p.prdctid", "to_jsonb(p)")
                .filter(BaseFilter::text_equals("p.prdctstts", "A")),
            RecordTranslator::new(Product)
                .copy("prdctabbv", "abbreviation")
                .copy("prdctnme", "name")
                .copy("prdctspcfcgrvty", "specificGravity"),
        ),
        CatalogEntry::bulk(
            "counterparties",
            EntitySource::new(Counterparty, "businessassociate ba", "ba.baid", "to_jsonb(ba)"),
            RecordTranslator::new(Counterparty)
                .copy("banme", "name")
                .copy("baabbvtn", "abbreviation")
                .copy("bastts", "status"),
        ),
        CatalogEntry::bulk(
            "colleagues",
            EntitySource::new(Colleague, "contact ct", "ct.cntctid", "to_jsonb(ct)"),
            RecordTranslator::new(Colleague)
                .copy("cntctfrstnme", "firstName")
                .copy("cntctlstnme", "lastName")
                .copy("cntctemailaddress", "email")
                .reference("cntctbaid", "counterparty"),
        ),
        CatalogEntry::bulk(
            "books",
            EntitySource::new(Book, "strategyheader sh", "sh.strtgyid", "to_jsonb(sh)"),
            RecordTranslator::new(Book)
                .copy("name", "name")
                .copy("status", "status"),
        ),
        CatalogEntry::bulk(
            "locations",
            EntitySource::new(Location, "locale l", "l.lcleid", "to_jsonb(l)"),
            RecordTranslator::new(Location)
                .copy("lcleabbrvtn", "abbreviation")
                .copy("lclenme", "name")
                .copy("lclestts", "status"),
        ),
        CatalogEntry::bulk(
            "counterparty_locations",
            EntitySource::new(
                CounterpartyLocation,
                "businessassociatelocale bal",
                "bal.balcleid",
                "to_jsonb(bal)",
            ),
            RecordTranslator::new(CounterpartyLocation)
                .reference("baid", "counterparty")
                .reference("lcleid", "location"),
        ),
        CatalogEntry::bulk(
            "price_service_setups",
            EntitySource::new(PriceServiceSetup, "rawpriceheader rph", "rph.rphdrid", "to_jsonb(rph)"),
            RecordTranslator::new(PriceServiceSetup)
                .copy("rphdrnme", "name")
                .copy("rphdrabbv", "abbreviation")
                .copy("rphdrstts", "status"),
        ),
        CatalogEntry::bulk(
            "trade_price_types",
            EntitySource::new(TradePriceType, "prvsn pv", "pv.prvsnid", "to_jsonb(pv)"),
            RecordTranslator::new(TradePriceType)
                .copy("prvsnnme", "name")
                .copy("prvsndscrptn", "description"),
        ),
        CatalogEntry::bulk(
            "trade_price_valuation_rules",
            EntitySource::new(
                TradePriceValuationRule,
                "pricevaluationrule pvr",
                "pvr.pvrid",
                "to_jsonb(pvr)",
            ),
            RecordTranslator::new(TradePriceValuationRule)
                .copy("name", "name")
                .copy("rule_text", "rule"),
        ),
        CatalogEntry::bulk(
            "payment_terms",
            EntitySource::new(PaymentTerm, "term t", "t.trmid", "to_jsonb(t)"),
            RecordTranslator::new(PaymentTerm)
                .copy("trmabbrvtn", "abbreviation")
                .copy("trmdscrptn", "description")
                .copy("trmnetdays", "netDays"),
        ),
        CatalogEntry::bulk(
            "calendars",
            EntitySource::new(Calendar, "calendar cal", "cal.calendarid", "to_jsonb(cal)"),
            RecordTranslator::new(Calendar)
                .copy("name", "name")
                .copy("holidays", "holidays"),
        ),
        CatalogEntry::bulk(
            "logistics_prices",
            EntitySource::new(LogisticsPrice, "logisticsprice lp", "lp.lgstcsprcid", "to_jsonb(lp)"),
            RecordTranslator::new(LogisticsPrice)
                .reference("lcleid", "location")
                .reference("prdctid", "product")
                .copy("price", "price")
                .copy("effective_from", "effectiveFromDateTime"),
        ),
        CatalogEntry::bulk(
            "product_locations",
            EntitySource::new(ProductLocation, "productlocale pl", "pl.prdctlcleid", "to_jsonb(pl)"),
            RecordTranslator::new(ProductLocation)
                .reference("prdctid", "product")
                .reference("lcleid", "location"),
        ),
    ]
}

fn incremental_entries(uom: &Arc<UomConversionCache>) -> Vec<CatalogEntry> {
    use EntityKind::*;

    vec![
        CatalogEntry::incremental(
            "trades",
            EntitySource::new(Trade, "dealheader dh", "dh.dlhdrid", "to_jsonb(dh)")
                .changed_at(ChangeTimestamp::Column("dh.dlhdrrvsndte".into()))
                .owned_by("dh.dlhdrextrnlbaid")
                .filter(BaseFilter::int_in("dh.dlhdrtyp", "TradeTypes", true))
                .filter(BaseFilter::at_or_after("dh.dlhdrtodte", "LoadStartDate", true))
                .filter(BaseFilter::int_in("dh.dlhdrintrnlbaid", "InternalCounterpartyIds", false)),
            RecordTranslator::new(Trade)
                .copy("dlhdrintrnlnbr", "tradeNumber")
                .copy("dlhdrtyp", "tradeType")
                .lookup("dlhdrstat", "status", TRADE_STATUSES)
                .copy("dlhdrdsplydte", "negotiatedTradeDateTime")
                .copy("dlhdrfrmdte", "effectiveFromDateTime")
                .copy("dlhdrtodte", "effectiveToDateTime")
                .reference("dlhdrextrnlbaid", "counterparty")
                .reference("dlhdrintrnlbaid", "internalCounterparty")
                .quantity("dlhdrqty", "dlhdruom", Some("dlhdrspcfcgrvty"), GALLONS, "quantity")
                .with_uom_cache(Arc::clone(uom)),
        ),
        CatalogEntry::incremental(
            "bills_of_lading",
            EntitySource::new(
                BillOfLading,
                "movementheader mh left join lateral (\
                     select max(xh.xhdrrvsndte) as last_transaction_at \
                     from transactionheader xh where xh.xhdrmvthdrid = mh.mvthdrid\
                 ) th on true",
                "mh.mvthdrid",
                "to_jsonb(mh)",
            )
            .changed_at(ChangeTimestamp::Greatest(vec![
                "mh.mvthdrrvsndte".into(),
                "th.last_transaction_at".into(),
            ]))
            .owned_by("mh.mvthdrextrnlbaid")
            .filter(BaseFilter::int_in("mh.mvthdrtyp", "MovementTypes", false))
            .filter(BaseFilter::at_or_after("mh.mvthdrdte", "MovementStartDate", true))
            .filter(BaseFilter::int_in("mh.mvthdrintrnlbaid", "InternalCounterpartyIds", false)),
            RecordTranslator::new(BillOfLading)
                .copy("mvthdrnmbr", "bolNumber")
                .copy("mvthdrdte", "movementDateTime")
                .lookup("mvthdrrcptdlvry", "receiptDelivery", RECEIPT_DELIVERY)
                .reference("mvthdrlcleid", "location")
                .reference("mvthdrprdctid", "product")
                .reference("mvthdrdlhdrid", "trade")
                .quantity("mvthdrgrssqty", "mvthdruom", Some("mvthdrspcfcgrvty"), GALLONS, "grossQuantity")
                .quantity("mvthdrntqty", "mvthdruom", Some("mvthdrspcfcgrvty"), GALLONS, "netQuantity")
                .with_uom_cache(Arc::clone(uom)),
        ),
        CatalogEntry::incremental(
            "invoices",
            EntitySource::new(Invoice, "salesinvoiceheader sih", "sih.slsinvcehdrid", "to_jsonb(sih)")
                .changed_at(ChangeTimestamp::Column("sih.slsinvcehdrrvsndte".into()))
                .owned_by("sih.slsinvcehdrbarltnbaid")
                .filter(BaseFilter::at_or_after("sih.slsinvcehdrpstddte", "LoadStartDate", true))
                .filter(BaseFilter::int_in("sih.slsinvcehdrslsinvcetpeid", "InvoiceTypes", false))
                .filter(BaseFilter::int_in("sih.slsinvcehdrintrnlbaid", "InternalCounterpartyIds", false)),
            RecordTranslator::new(Invoice)
                .copy("slsinvcehdrnmbr", "invoiceNumber")
                .copy("slsinvcehdrpstddte", "postedDateTime")
                .copy("slsinvcehdrduedte", "dueDateTime")
                .copy("slsinvcehdrttlvl", "totalAmount")
                .lookup("slsinvcehdrpyblrcvbl", "payableReceivable", PAYABLE_RECEIVABLE)
                .reference("slsinvcehdrbarltnbaid", "counterparty")
                .reference("slsinvcehdrcrrncyid", "currency"),
        ),
        CatalogEntry::incremental(
            "custom_invoices",
            EntitySource::new(CustomInvoice, "custominvoiceheader cih", "cih.custominvoiceid", "to_jsonb(cih)")
                .changed_at(ChangeTimestamp::Column("cih.lastupdatetimestamp".into()))
                .owned_by("cih.externalbaid")
                .filter(BaseFilter::at_or_after("cih.invoicedate", "LoadStartDate", true))
                .filter(BaseFilter::int_in("cih.internalbaid", "InternalCounterpartyIds", false)),
            RecordTranslator::new(CustomInvoice)
                .copy("invoicenumber", "invoiceNumber")
                .copy("invoicedate", "invoiceDateTime")
                .copy("amount", "totalAmount")
                .copy("openamount", "unpaidAmount")
                .reference("externalbaid", "counterparty"),
        )
        .completing_pass(),
        CatalogEntry::incremental(
            "efts",
            EntitySource::new(Eft, "bankdepositheader bdh", "bdh.bankdeposithdrid", "to_jsonb(bdh)")
                .changed_at(ChangeTimestamp::Column("bdh.lastupdatetimestamp".into()))
                .owned_by("bdh.externalbaid")
                .filter(BaseFilter::at_or_after("bdh.planneddepositdate", "LoadStartDate", true))
                .filter(BaseFilter::int_in("bdh.internalbaid", "InternalCounterpartyIds", false)),
            RecordTranslator::new(Eft)
                .copy("planneddepositdate", "paymentDate")
                .copy("depositamount", "amount")
                .copy("referencenumber", "referenceNumber")
                .reference("externalbaid", "counterparty")
                .reference("internalbaid", "internalCounterparty"),
        ),
        CatalogEntry::incremental(
            "prices",
            EntitySource::new(Price, "rawpricedetail rpd", "rpd.idnty", "to_jsonb(rpd)")
                .changed_at(ChangeTimestamp::Column("rpd.rpdtlentrydte".into()))
                .filter(BaseFilter::at_or_after("rpd.rpdtlentrydte", "LoadStartDate", true)),
            RecordTranslator::new(Price)
                .reference("rpdtlrplcleid", "priceInstrument")
                .copy("rpdtlqtefrmdte", "effectiveFromDateTime")
                .copy("rpdtlqtetodte", "effectiveToDateTime")
                .copy("rpdtltrdefrmdte", "tradePeriodFromDateTime")
                .copy("rpdtltrdetodte", "tradePeriodToDateTime")
                .copy("rpdtlprce", "value"),
        ),
        CatalogEntry::incremental(
            "invoice_documents",
            EntitySource::new(
                InvoiceDocument,
                "salesinvoiceheader sih join lateral (\
                     select max(ddl.distributeddate) as max_distributed_date, \
                            max(ddl.dmtdocumentid) as document_id \
                     from salesinvoicelog sil \
                     join dmtdistributeddocumentlog ddl on ddl.dmtdocumentid = sil.dmtdocumentid \
                     where sil.slsinvcehdrid = sih.slsinvcehdrid and ddl.distributionmethod = 'FS'\
                 ) dl on dl.max_distributed_date is not null",
                "sih.slsinvcehdrid",
                "jsonb_build_object('invoice_number', sih.slsinvcehdrnmbr, 'document_id', dl.document_id)",
            )
            .changed_at(ChangeTimestamp::Column("dl.max_distributed_date".into()))
            .owned_by("sih.slsinvcehdrbarltnbaid")
            .filter(BaseFilter::at_or_after("sih.slsinvcehdrpstddte", "LoadStartDate", true))
            .filter(BaseFilter::int_in("sih.slsinvcehdrintrnlbaid", "InternalCounterpartyIds", false)),
            RecordTranslator::new(InvoiceDocument)
                .reference("document_id", "document")
                .copy("invoice_number", "invoiceNumber")
                .skip_without("document_id"),
        ),
        CatalogEntry::incremental(
            "trade_documents",
            EntitySource::new(
                TradeDocument,
                "dealheaderarchive dha join dealheader dh on dh.dlhdrid = dha.dlhdrid",
                "dha.dlhdrarchveid",
                "jsonb_build_object('trade_id', dh.dlhdrid, 'document_id', dha.dmtdocumentid, \
                 'printed_at', dha.printdate)",
            )
            .changed_at(ChangeTimestamp::Column("dha.printdate".into()))
            .owned_by("dh.dlhdrextrnlbaid")
            .filter(BaseFilter::at_or_after("dha.printdate", "LoadStartDate", true))
            .filter(BaseFilter::int_in("dh.dlhdrtyp", "TradeTypes", true)),
            RecordTranslator::new(TradeDocument)
                .reference("trade_id", "trade")
                .reference("document_id", "document")
                .copy("printed_at", "printedDateTime")
                .skip_without("document_id"),
        ),
    ]
}

/// Register every catalog entry against the source pool and destination.
pub fn build_registry(
    pool: &PgPool,
    client: &DestinationClient,
    uom: &Arc<UomConversionCache>,
) -> TradeSyncResult<JobRegistry> {
    let mut registry = JobRegistry::new();
    for entry in entries(uom) {
        let name = entry.name;
        let kind = entry.kind;
        let pool = pool.clone();
        let client = client.clone();
        registry.register(name, kind, move || Ok(entry.job(&pool, &client)))?;
    }
    tracing::debug!(jobs = registry.len(), "job registry built");
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use async_trait::async_trait;
    use tradesync_db::uom::models::UomConversion;
    use tradesync_db::uom::repositories::UomConversionRepository;

    struct NoConversions;

    #[async_trait]
    impl UomConversionRepository for NoConversions {
        async fn list_conversions(&self) -> TradeSyncResult<Vec<UomConversion>> {
            Ok(Vec::new())
        }
    }

    fn catalog() -> Vec<CatalogEntry> {
        entries(&Arc::new(UomConversionCache::new(Arc::new(NoConversions))))
    }

    fn names(kind: JobKind) -> Vec<&'static str> {
        catalog()
            .into_iter()
            .filter(|e| e.kind == kind)
            .map(|e| e.name)
            .collect()
    }

    #[test]
    fn bulk_jobs_run_in_declared_order() {
        assert_eq!(
            names(JobKind::Bulk),
            vec![
                "code_sets",
                "currencies",
                "units_of_measure",
                "products",
                "counterparties",
                "colleagues",
                "books",
                "locations",
                "counterparty_locations",
                "price_service_setups",
                "trade_price_types",
                "trade_price_valuation_rules",
                "payment_terms",
                "calendars",
                "logistics_prices",
                "product_locations",
            ]
        );
    }

    #[test]
    fn incremental_jobs_run_in_declared_order() {
        assert_eq!(
            names(JobKind::Incremental),
            vec![
                "trades",
                "bills_of_lading",
                "invoices",
                "custom_invoices",
                "efts",
                "prices",
                "invoice_documents",
                "trade_documents",
            ]
        );
    }

    #[test]
    fn names_and_entities_are_unique() {
        let catalog = catalog();
        let names: HashSet<_> = catalog.iter().map(|e| e.name).collect();
        let kinds: HashSet<_> = catalog.iter().map(|e| e.source.kind).collect();
        assert_eq!(names.len(), catalog.len());
        assert_eq!(kinds.len(), EntityKind::ALL.len());
    }

    #[test]
    fn incremental_sources_track_changes() {
        for entry in catalog().iter().filter(|e| e.kind == JobKind::Incremental) {
            assert!(
                entry.source.change_timestamp.is_some(),
                "{} has no change timestamp",
                entry.name
            );
        }
    }

    #[test]
    fn prices_cannot_be_resynced() {
        let catalog = catalog();
        let owners: Vec<_> = catalog
            .iter()
            .filter(|e| e.kind == JobKind::Incremental && e.source.counterparty_column.is_none())
            .map(|e| e.name)
            .collect();
        assert_eq!(owners, vec!["prices"]);
    }

    #[test]
    fn only_custom_invoices_complete_passes() {
        let completing: Vec<_> = catalog()
            .into_iter()
            .filter(|e| e.completes_pass)
            .map(|e| e.name)
            .collect();
        assert_eq!(completing, vec!["custom_invoices"]);
    }

    #[test]
    fn bills_of_lading_use_greatest_of_header_and_transactions() {
        let catalog = catalog();
        let bol = catalog.iter().find(|e| e.name == "bills_of_lading").unwrap();
        assert_eq!(
            bol.source.change_timestamp.as_ref().map(ChangeTimestamp::sql).as_deref(),
            Some("greatest(mh.mvthdrrvsndte, th.last_transaction_at)")
        );
    }

    #[tokio::test]
    async fn registry_builds_every_job() {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unused")
            .unwrap();
        let client = DestinationClient::new(crate::destination::client::DestinationClientConfig {
            base_url: "http://localhost".into(),
            api_token: None,
            max_retries: 0,
            timeout_secs: 1,
        })
        .unwrap();
        let uom = Arc::new(UomConversionCache::new(Arc::new(NoConversions)));

        let registry = build_registry(&pool, &client, &uom).unwrap();
        assert_eq!(registry.len(), 24);
        for kind in [JobKind::Bulk, JobKind::Incremental] {
            for registered in registry.jobs(kind) {
                let job = registered.build().unwrap();
                assert_eq!(job.name(), registered.name());
            }
        }
    }
}
