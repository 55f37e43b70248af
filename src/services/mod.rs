pub mod dataverse;
