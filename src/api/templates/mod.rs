pub mod redeem_templates;
