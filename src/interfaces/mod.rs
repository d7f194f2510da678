pub mod ussd;
