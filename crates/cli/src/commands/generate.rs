use clap::Args;
use couponkit_core::coupons::codegen::{
    verify_checksum, CodeOptions, DEFAULT_EXPIRY_DAYS, DEFAULT_LENGTH, DEFAULT_SEGMENT_LENGTH, DEFAULT_SEPARATOR,
};
use couponkit_core::domain::coupon::DiscountType;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::info;

use crate::commands::{build_service, execute, open_pool, CommandResult, EXIT_COMMAND};

#[derive(Debug, Clone, Args)]
pub struct CodeArgs {
    #[arg(long, default_value = "", help = "Prefix placed before the code body")]
    pub prefix: String,
    #[arg(long, default_value_t = DEFAULT_LENGTH, help = "Number of random body characters")]
    pub length: usize,
    #[arg(long, help = "Use digits only")]
    pub no_letters: bool,
    #[arg(long, help = "Use letters only")]
    pub no_numbers: bool,
    #[arg(long, default_value = DEFAULT_SEPARATOR, help = "Separator between prefix and body segments")]
    pub separator: String,
    #[arg(long, default_value_t = DEFAULT_SEGMENT_LENGTH, help = "Body segment length (0 disables segmenting)")]
    pub segment_length: usize,
    #[arg(long, help = "Discount value to seal into the code")]
    pub discount_value: Option<Decimal>,
    #[arg(long, default_value = "percentage", value_parser = parse_discount_type)]
    pub discount_type: DiscountType,
    #[arg(long, default_value_t = DEFAULT_EXPIRY_DAYS, help = "Validity in days recorded with sealed metadata")]
    pub expiry_days: u32,
}

impl CodeArgs {
    pub fn options(&self) -> CodeOptions {
        CodeOptions {
            prefix: self.prefix.clone(),
            length: self.length,
            use_letters: !self.no_letters,
            use_numbers: !self.no_numbers,
            separator: self.separator.clone(),
            segment_length: self.segment_length,
            discount_value: self.discount_value,
            discount_type: self.discount_type,
            expiry_days: self.expiry_days,
        }
    }
}

impl Default for CodeArgs {
    fn default() -> Self {
        let defaults = CodeOptions::default();
        Self {
            prefix: defaults.prefix,
            length: defaults.length,
            no_letters: !defaults.use_letters,
            no_numbers: !defaults.use_numbers,
            separator: defaults.separator,
            segment_length: defaults.segment_length,
            discount_value: defaults.discount_value,
            discount_type: defaults.discount_type,
            expiry_days: defaults.expiry_days,
        }
    }
}

pub(crate) fn parse_discount_type(value: &str) -> Result<DiscountType, String> {
    DiscountType::parse(value).ok_or_else(|| format!("`{value}` is not one of percentage|fixed"))
}

#[derive(Debug, Serialize)]
struct GeneratedBatch {
    codes: Vec<GeneratedEntry>,
}

#[derive(Debug, Serialize)]
struct GeneratedEntry {
    code: String,
    strategy: &'static str,
}

pub fn run(args: CodeArgs, count: u32) -> CommandResult {
    execute("generate", move |config| async move {
        let pool = open_pool(&config).await?;
        let service = build_service(&config, &pool)?;
        let options = args.options();

        let mut codes = Vec::new();
        for _ in 0..count.max(1) {
            let generated = service.generate_coupon_code(options.clone()).await;
            codes.push(GeneratedEntry { code: generated.code, strategy: generated.strategy });
        }
        pool.close().await;

        info!(event_name = "cli.generate.completed", generated = codes.len(), "codes generated");
        Ok(CommandResult::success_with_data(
            "generate",
            format!("generated {} code(s)", codes.len()),
            &GeneratedBatch { codes },
        ))
    })
}

/// Checks a code's trailing checksum against the options it was generated with.
pub fn verify(code: &str, args: &CodeArgs) -> CommandResult {
    if verify_checksum(code, &args.options()) {
        CommandResult::success("verify", format!("checksum of `{code}` is valid"))
    } else {
        CommandResult::failure(
            "verify",
            "checksum_mismatch",
            format!("checksum of `{code}` does not match"),
            EXIT_COMMAND,
        )
    }
}
