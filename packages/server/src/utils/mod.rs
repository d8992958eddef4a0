pub mod source_url;
